//! Orthopatch - tile versioning and raster patching for orthophoto mosaics
//!
//! This library implements the core of a mosaic correction service: a user
//! draws a polygon over an orthophoto tile pyramid, and the engine recolors
//! the "graph" layer and replaces the "ortho" pixels under that polygon with
//! pixels from a chosen source image, on every pyramid tile the polygon
//! touches. Each edit is recorded as a reversible patch backed by archived
//! tile versions on disk.
//!
//! # High-Level API
//!
//! Most callers only need [`history::PatchHistory`]:
//!
//! ```ignore
//! use orthopatch::history::PatchHistory;
//!
//! let mut history = PatchHistory::open("cache")?;
//! let applied = history.apply(collection)?;
//! println!("patch {} touched {} tiles", applied.id, applied.tiles.len());
//! history.undo()?;
//! ```

pub mod composite;
pub mod geojson;
pub mod history;
pub mod logging;
pub mod mask;
pub mod pyramid;
pub mod store;

/// Version of the orthopatch library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
