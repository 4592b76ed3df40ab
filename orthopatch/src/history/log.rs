//! Persisted patch log.
//!
//! Two FeatureCollection documents live at the root of the cache directory:
//! `activePatchs.json` (applied patches, oldest first) and
//! `unactivePatchs.json` (undone patches, oldest-undone first). Features of
//! one patch share a `patchId` and always move between the documents as a
//! whole group. Every save goes through a temp file and an atomic rename so
//! a crash never leaves a truncated log.

use crate::geojson::{Feature, FeatureCollection};
use crate::pyramid::TileCoord;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filename of the applied-patch log.
pub const ACTIVE_LOG: &str = "activePatchs.json";
/// Filename of the undone-patch log.
pub const INACTIVE_LOG: &str = "unactivePatchs.json";

/// Patch log errors.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("patch log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed patch log {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The two persisted patch stacks of one cache directory.
#[derive(Debug)]
pub struct PatchLog {
    cache_dir: PathBuf,
    pub(crate) active: FeatureCollection,
    pub(crate) inactive: FeatureCollection,
}

impl PatchLog {
    /// Load both logs; an absent file is an empty collection.
    pub fn load(cache_dir: &Path) -> Result<Self, LogError> {
        Ok(PatchLog {
            cache_dir: cache_dir.to_path_buf(),
            active: load_collection(&cache_dir.join(ACTIVE_LOG))?,
            inactive: load_collection(&cache_dir.join(INACTIVE_LOG))?,
        })
    }

    pub fn active(&self) -> &FeatureCollection {
        &self.active
    }

    /// First id that has never been used by any patch in either log.
    ///
    /// Ids stay monotonic across undo: an undone patch still occupies its
    /// id from the inactive log.
    pub fn next_patch_id(&self) -> u32 {
        self.active
            .features
            .iter()
            .chain(self.inactive.features.iter())
            .filter_map(|f| f.properties.patch_id)
            .max()
            .map_or(1, |id| id + 1)
    }

    /// Patch id on top of the active stack.
    pub fn last_active_patch_id(&self) -> Option<u32> {
        self.active
            .features
            .last()
            .and_then(|f| f.properties.patch_id)
    }

    /// Patch id on top of the inactive stack.
    pub fn last_inactive_patch_id(&self) -> Option<u32> {
        self.inactive
            .features
            .last()
            .and_then(|f| f.properties.patch_id)
    }

    /// Union of the tiles one active patch modified, without removing it.
    pub fn active_patch_tiles(&self, patch_id: u32) -> BTreeSet<TileCoord> {
        patch_tiles(&self.active, patch_id)
    }

    /// Union of the tiles one inactive patch modified, without removing it.
    pub fn inactive_patch_tiles(&self, patch_id: u32) -> BTreeSet<TileCoord> {
        patch_tiles(&self.inactive, patch_id)
    }

    /// Remove every active feature of one patch, returning them in order.
    pub fn take_active(&mut self, patch_id: u32) -> Vec<Feature> {
        take_patch(&mut self.active, patch_id)
    }

    /// Remove every inactive feature of one patch.
    pub fn take_inactive(&mut self, patch_id: u32) -> Vec<Feature> {
        take_patch(&mut self.inactive, patch_id)
    }

    /// Union of the tiles referenced by every patch in both logs.
    pub fn all_tiles(&self) -> BTreeSet<TileCoord> {
        self.active
            .features
            .iter()
            .chain(self.inactive.features.iter())
            .flat_map(|f| f.properties.tiles.iter().flatten())
            .copied()
            .collect()
    }

    /// Persist the active log atomically.
    pub fn save_active(&self) -> Result<(), LogError> {
        save_collection(&self.cache_dir.join(ACTIVE_LOG), &self.active)
    }

    /// Persist the inactive log atomically.
    pub fn save_inactive(&self) -> Result<(), LogError> {
        save_collection(&self.cache_dir.join(INACTIVE_LOG), &self.inactive)
    }
}

fn take_patch(collection: &mut FeatureCollection, patch_id: u32) -> Vec<Feature> {
    let features = std::mem::take(&mut collection.features);
    let (taken, kept): (Vec<_>, Vec<_>) = features
        .into_iter()
        .partition(|f| f.properties.patch_id == Some(patch_id));
    collection.features = kept;
    taken
}

fn patch_tiles(collection: &FeatureCollection, patch_id: u32) -> BTreeSet<TileCoord> {
    collection
        .features
        .iter()
        .filter(|f| f.properties.patch_id == Some(patch_id))
        .flat_map(|f| f.properties.tiles.iter().flatten())
        .copied()
        .collect()
}

fn load_collection(path: &Path) -> Result<FeatureCollection, LogError> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).map_err(|source| LogError::Malformed {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FeatureCollection::empty()),
        Err(source) => Err(LogError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn save_collection(path: &Path, collection: &FeatureCollection) -> Result<(), LogError> {
    let io_err = |source| LogError::Io {
        path: path.to_path_buf(),
        source,
    };
    let text = serde_json::to_vec_pretty(collection).map_err(|source| LogError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(io_err)?;
    file.write_all(&text).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
