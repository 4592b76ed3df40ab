//! Patch history and orchestration.
//!
//! [`PatchHistory`] owns everything a cache directory needs to accept,
//! revert, and replay polygon patches: the pyramid description, the version
//! store, and the persisted two-stack patch log. One `apply` walks
//! pyramid geometry, mask rasterization, compositing, and the version store
//! in that order; `undo` and `redo` only repoint versioned tile files and
//! move patch groups between the stacks.
//!
//! All mutating operations take `&mut self`; at most one of them may run at
//! a time against a given cache directory.

mod log;

pub use log::{LogError, PatchLog, ACTIVE_LOG, INACTIVE_LOG};

use crate::composite::{self, CompositeError};
use crate::geojson::{self, Feature, FeatureCollection, ValidationError};
use crate::mask::{self, TileMask};
use crate::pyramid::{
    self, GeometryError, PyramidConfig, PyramidError, TileCoord, PYRAMID_DESCRIPTOR,
};
use crate::store::{Channel, StoreError, VersionId, VersionStore};
use image::RgbaImage;
use std::io::Cursor;
use std::path::PathBuf;
use std::thread;
use tracing::{debug, info, warn};

/// Errors surfaced by patch operations.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Pyramid(#[from] PyramidError),

    /// A tile file required by the request is absent. Nothing was mutated.
    #[error("missing file {filename} for tile {tile}")]
    MissingTileData { tile: TileCoord, filename: String },

    /// The source image exists but cannot be decoded.
    #[error("cannot decode source image {filename} for tile {tile}")]
    MissingSource { tile: TileCoord, filename: String },

    #[error(transparent)]
    Composite(#[from] CompositeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result of a successful `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    /// Id assigned to the patch
    pub id: u32,
    /// Tiles whose current files were repointed
    pub tiles: Vec<TileCoord>,
}

/// Result of an `undo` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    /// The named patch was taken out
    Reverted(u32),
    /// The active stack was empty
    Nothing,
}

/// Result of a `redo` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedoOutcome {
    /// The named patch was put back
    Reapplied(u32),
    /// The inactive stack was empty
    Nothing,
}

/// Result of a `clear` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// History wiped and tiles restored
    Cleared,
    /// Both stacks were already empty
    Nothing,
}

/// One tile's freshly composited channel images, PNG-encoded.
struct RenderedTile {
    tile: TileCoord,
    graph_png: Vec<u8>,
    ortho_png: Vec<u8>,
}

/// Patch engine for one cache directory.
pub struct PatchHistory {
    pyramid: PyramidConfig,
    store: VersionStore,
    log: PatchLog,
    next_patch_id: u32,
}

impl PatchHistory {
    /// Open a cache directory: load its pyramid descriptor and both patch
    /// logs, and seed the patch id counter past every id ever used.
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self, PatchError> {
        let cache_dir = cache_dir.into();
        let pyramid = PyramidConfig::from_file(&cache_dir.join(PYRAMID_DESCRIPTOR))?;
        Self::with_config(cache_dir, pyramid)
    }

    /// Open a cache directory with an explicit pyramid description.
    pub fn with_config(
        cache_dir: impl Into<PathBuf>,
        pyramid: PyramidConfig,
    ) -> Result<Self, PatchError> {
        let cache_dir = cache_dir.into();
        let log = PatchLog::load(&cache_dir)?;
        let next_patch_id = log.next_patch_id();
        debug!(
            cache_dir = %cache_dir.display(),
            next_patch_id,
            active = log.active().features.len(),
            "patch history opened"
        );
        Ok(PatchHistory {
            pyramid,
            store: VersionStore::new(cache_dir),
            log,
            next_patch_id,
        })
    }

    pub fn pyramid(&self) -> &PyramidConfig {
        &self.pyramid
    }

    /// The applied-patch log, as served verbatim to clients.
    pub fn active(&self) -> &FeatureCollection {
        self.log.active()
    }

    /// Apply a polygon patch request.
    ///
    /// Validates the request, computes the affected tiles at every pyramid
    /// level, rasterizes and composites each tile with a non-empty mask,
    /// then commits the results in two phases: every new tile file is
    /// staged durably before the first current pointer moves. The patch is
    /// recorded in the active log and the redo stack is purged together
    /// with its archived tile versions, since its patches can no longer be
    /// replayed consistently.
    ///
    /// If any required tile file is missing the whole request fails before
    /// anything is mutated.
    pub fn apply(&mut self, collection: FeatureCollection) -> Result<AppliedPatch, PatchError> {
        geojson::validate(&collection)?;
        let bbox = pyramid::bounding_box(&collection.features)?;
        let tiles: Vec<TileCoord> = pyramid::affected_tiles(&bbox, &self.pyramid)
            .into_iter()
            .collect();
        debug!(candidates = tiles.len(), "affected tiles computed");

        let masks = rasterize_tiles(&tiles, &collection.features, &self.pyramid);
        let candidates: Vec<(TileCoord, TileMask)> = tiles
            .into_iter()
            .zip(masks)
            .filter_map(|(tile, mask)| mask.map(|m| (tile, m)))
            .collect();

        // Color and source image follow the first feature for the whole
        // request.
        let color = collection.features[0].properties.color;
        let source = collection.features[0].properties.source_image.clone();

        // Preconditions for every tile, before any mutation.
        for (tile, _) in &candidates {
            for channel in Channel::ALL {
                if !self.store.current_exists(tile, channel) {
                    return Err(PatchError::MissingTileData {
                        tile: *tile,
                        filename: format!("{channel}.png"),
                    });
                }
            }
            if !self.store.source_exists(tile, &source) {
                return Err(PatchError::MissingTileData {
                    tile: *tile,
                    filename: format!("{source}.png"),
                });
            }
        }

        let patch_id = self.next_patch_id;
        let rendered = render_tiles(&self.store, &candidates, color, &source)?;

        // Phase one: stage every new file durably.
        let mut staged: Vec<(TileCoord, Channel)> = Vec::with_capacity(rendered.len() * 2);
        for item in &rendered {
            let channels = [
                (Channel::Graph, &item.graph_png),
                (Channel::Ortho, &item.ortho_png),
            ];
            for (channel, content) in channels {
                if let Err(e) = self.store.stage(&item.tile, channel, content, patch_id) {
                    warn!(tile = %item.tile, error = %e, "staging failed, aborting request");
                    for (tile, channel) in &staged {
                        self.store.discard_staged(tile, *channel, patch_id);
                    }
                    return Err(e.into());
                }
                staged.push((item.tile, channel));
            }
        }

        // Phase two: repoint the current files.
        for item in &rendered {
            for channel in Channel::ALL {
                self.store.promote(&item.tile, channel, patch_id)?;
            }
        }

        let modified: Vec<TileCoord> = rendered.iter().map(|r| r.tile).collect();
        let mut features = collection.features;
        for feature in &mut features {
            feature.properties.patch_id = Some(patch_id);
            feature.properties.tiles = Some(modified.clone());
        }
        self.log.active.features.extend(features);
        self.log.save_active()?;
        // Purged redo patches lose their archived versions too; a leftover
        // archive would let a later undo land on a patch that is gone from
        // history.
        for feature in &self.log.inactive.features {
            if let (Some(id), Some(tiles)) =
                (feature.properties.patch_id, feature.properties.tiles.as_ref())
            {
                for tile in tiles {
                    self.store.remove_patch_versions(tile, id)?;
                }
            }
        }
        self.log.inactive.features.clear();
        self.log.save_inactive()?;
        self.next_patch_id += 1;

        info!(patch_id, tiles = modified.len(), "patch applied");
        Ok(AppliedPatch {
            id: patch_id,
            tiles: modified,
        })
    }

    /// Revert the patch on top of the active stack.
    ///
    /// Every affected tile channel is repointed at its greatest archived
    /// version below the undone id, or at `_orig` when none exists. A tile
    /// without any archive was never actually modified and is skipped.
    pub fn undo(&mut self) -> Result<UndoOutcome, PatchError> {
        let Some(patch_id) = self.log.last_active_patch_id() else {
            debug!("nothing to undo");
            return Ok(UndoOutcome::Nothing);
        };
        let tiles = self.log.active_patch_tiles(patch_id);
        debug!(patch_id, tiles = tiles.len(), "undoing patch");
        for tile in &tiles {
            for channel in Channel::ALL {
                let target = self.store.latest_version_below(tile, channel, patch_id)?;
                match self.store.revert_to(tile, channel, target) {
                    Ok(()) => {}
                    Err(StoreError::VersionNotFound { .. }) => {
                        debug!(tile = %tile, channel = %channel, "never archived, skipping");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        // The patch leaves the active log only once every tile is
        // repointed; a failed revert keeps it recorded as applied.
        let features = self.log.take_active(patch_id);
        self.log.save_active()?;
        self.log.inactive.features.extend(features);
        self.log.save_inactive()?;
        info!(patch_id, "patch undone");
        Ok(UndoOutcome::Reverted(patch_id))
    }

    /// Reapply the patch on top of the inactive stack.
    ///
    /// The archived version for that exact id was written by the original
    /// apply, so each affected tile channel is repointed straight at it.
    pub fn redo(&mut self) -> Result<RedoOutcome, PatchError> {
        let Some(patch_id) = self.log.last_inactive_patch_id() else {
            debug!("nothing to redo");
            return Ok(RedoOutcome::Nothing);
        };
        let tiles = self.log.inactive_patch_tiles(patch_id);
        debug!(patch_id, tiles = tiles.len(), "redoing patch");
        for tile in &tiles {
            for channel in Channel::ALL {
                match self
                    .store
                    .revert_to(tile, channel, VersionId::Patch(patch_id))
                {
                    Ok(()) => {}
                    Err(StoreError::VersionNotFound { .. }) => {
                        debug!(tile = %tile, channel = %channel, "no archive for patch, skipping");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        // Same discipline as undo: the stacks move only after the reverts.
        let features = self.log.take_inactive(patch_id);
        self.log.active.features.extend(features);
        self.log.save_active()?;
        self.log.save_inactive()?;
        info!(patch_id, "patch reapplied");
        Ok(RedoOutcome::Reapplied(patch_id))
    }

    /// Wipe all history: restore every referenced tile to its pre-edit
    /// content, delete every numbered archived version, and empty both
    /// stacks.
    pub fn clear(&mut self) -> Result<ClearOutcome, PatchError> {
        if self.log.active.features.is_empty() && self.log.inactive.features.is_empty() {
            debug!("nothing to clear");
            return Ok(ClearOutcome::Nothing);
        }
        let tiles = self.log.all_tiles();
        debug!(tiles = tiles.len(), "clearing history");
        for tile in &tiles {
            self.store.clear_tile(tile)?;
        }
        self.log.active.features.clear();
        self.log.inactive.features.clear();
        self.log.save_active()?;
        self.log.save_inactive()?;
        info!("history cleared");
        Ok(ClearOutcome::Cleared)
    }
}

/// Rasterize masks for a batch of tiles, fanned out over worker threads.
///
/// One slot per input tile; `None` marks an empty mask. Rasterization is
/// pure, so workers share nothing mutable beyond their own output slots.
fn rasterize_tiles(
    tiles: &[TileCoord],
    features: &[Feature],
    config: &PyramidConfig,
) -> Vec<Option<TileMask>> {
    if tiles.is_empty() {
        return Vec::new();
    }
    let mut masks: Vec<Option<TileMask>> = Vec::with_capacity(tiles.len());
    masks.resize_with(tiles.len(), || None);
    let chunk = batch_chunk_size(tiles.len());
    thread::scope(|scope| {
        for (tile_chunk, mask_chunk) in tiles.chunks(chunk).zip(masks.chunks_mut(chunk)) {
            scope.spawn(move || {
                for (tile, slot) in tile_chunk.iter().zip(mask_chunk.iter_mut()) {
                    *slot = mask::rasterize(tile, features, config);
                }
            });
        }
    });
    masks
}

/// Composite and PNG-encode every candidate tile, fanned out over worker
/// threads. Reads tile files but never writes.
fn render_tiles(
    store: &VersionStore,
    candidates: &[(TileCoord, TileMask)],
    color: [u8; 3],
    source: &str,
) -> Result<Vec<RenderedTile>, PatchError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let mut results: Vec<Option<Result<RenderedTile, PatchError>>> =
        Vec::with_capacity(candidates.len());
    results.resize_with(candidates.len(), || None);
    let chunk = batch_chunk_size(candidates.len());
    thread::scope(|scope| {
        for (input_chunk, result_chunk) in candidates.chunks(chunk).zip(results.chunks_mut(chunk)) {
            scope.spawn(move || {
                for ((tile, mask), slot) in input_chunk.iter().zip(result_chunk.iter_mut()) {
                    *slot = Some(render_tile(store, tile, mask, color, source));
                }
            });
        }
    });
    results
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| unreachable!("every slot is filled by a worker")))
        .collect()
}

fn render_tile(
    store: &VersionStore,
    tile: &TileCoord,
    mask: &TileMask,
    color: [u8; 3],
    source: &str,
) -> Result<RenderedTile, PatchError> {
    let graph = decode(&store.read_current(tile, Channel::Graph)?)?;
    let ortho = decode(&store.read_current(tile, Channel::Ortho)?)?;
    let source_image =
        decode(&store.read_source(tile, source)?).map_err(|_| PatchError::MissingSource {
            tile: *tile,
            filename: format!("{source}.png"),
        })?;
    let graph_out = composite::composite_graph(mask, &graph, color)?;
    let ortho_out = composite::composite_ortho(mask, &ortho, &source_image)?;
    Ok(RenderedTile {
        tile: *tile,
        graph_png: encode_png(&graph_out)?,
        ortho_png: encode_png(&ortho_out)?,
    })
}

fn decode(bytes: &[u8]) -> Result<RgbaImage, PatchError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, PatchError> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, image::ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

fn batch_chunk_size(len: usize) -> usize {
    let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    len.div_ceil(workers).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rasterize_tiles_empty_batch() {
        let config = PyramidConfig {
            x_origin: 0.0,
            y_origin: 0.0,
            resolution: 1.0,
            level_min: 0,
            level_max: 0,
            tile_width: 16,
            tile_height: 16,
        };
        assert!(rasterize_tiles(&[], &[], &config).is_empty());
    }

    #[test]
    fn test_batch_chunk_size_never_zero() {
        assert!(batch_chunk_size(1) >= 1);
        assert!(batch_chunk_size(1000) >= 1);
    }
}
