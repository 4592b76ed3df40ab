//! On-disk tile version store.
//!
//! Each tile channel ("graph", "ortho") has one current file plus archived
//! versions named `_orig` (the pre-edit content) and `_<patchId>` (one per
//! applied patch). The current file is a hard link to whichever version is
//! in effect, so coexisting versions share storage and repointing is cheap.
//!
//! Commits are two-phase. [`VersionStore::stage`] durably writes the new
//! archived version (temp file, fsync, rename) without touching the current
//! file; [`VersionStore::promote`] is the short repoint step, run only after
//! every staged write of a request has succeeded. Whether the pre-edit
//! content still needs archiving is decided by the presence of the `_orig`
//! file, not by inspecting link counts.

mod paths;

pub use paths::{current_path, source_path, tile_directory, version_path};

use crate::pyramid::TileCoord;
use paths::parse_version_filename;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Raster channel of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Styling layer, repainted with a flat color
    Graph,
    /// Photographic layer, repatched from a source image
    Ortho,
}

impl Channel {
    /// Both channels, in commit order.
    pub const ALL: [Channel; 2] = [Channel::Graph, Channel::Ortho];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Graph => "graph",
            Channel::Ortho => "ortho",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one archived tile version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionId {
    /// Pre-edit content
    Orig,
    /// Content committed by a patch
    Patch(u32),
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionId::Orig => f.write_str("orig"),
            VersionId::Patch(id) => write!(f, "{id}"),
        }
    }
}

/// Version store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure on a tile file
    #[error("tile store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The requested archived version does not exist on disk.
    ///
    /// During undo/redo this means the patch never actually touched the
    /// tile; callers treat it as a per-tile no-op.
    #[error("no archived version {version} for tile {tile} channel {channel}")]
    VersionNotFound {
        tile: TileCoord,
        channel: Channel,
        version: VersionId,
    },
}

fn io_err(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Manages the versioned tile files of one cache directory.
///
/// The store itself is stateless; all state lives in the filesystem. It is
/// `Sync` and safe to share for reads, but mutating operations for one cache
/// directory must be serialized by the caller.
#[derive(Debug, Clone)]
pub struct VersionStore {
    cache_dir: PathBuf,
}

impl VersionStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        VersionStore {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Whether the current file of a tile channel exists.
    pub fn current_exists(&self, tile: &TileCoord, channel: Channel) -> bool {
        current_path(&self.cache_dir, tile, channel).exists()
    }

    /// Whether a named source image exists in the tile directory.
    pub fn source_exists(&self, tile: &TileCoord, source: &str) -> bool {
        source_path(&self.cache_dir, tile, source).exists()
    }

    /// Read the current content of a tile channel.
    pub fn read_current(&self, tile: &TileCoord, channel: Channel) -> Result<Vec<u8>, StoreError> {
        let path = current_path(&self.cache_dir, tile, channel);
        fs::read(&path).map_err(|e| io_err(&path, e))
    }

    /// Read a named source image from the tile directory.
    pub fn read_source(&self, tile: &TileCoord, source: &str) -> Result<Vec<u8>, StoreError> {
        let path = source_path(&self.cache_dir, tile, source);
        fs::read(&path).map_err(|e| io_err(&path, e))
    }

    /// Durably write new content as the archived version for a patch.
    ///
    /// The bytes go to a temporary name first and are fsynced before the
    /// rename, so a crash never leaves a half-written version file under
    /// its final name. The current file is not touched.
    pub fn stage(
        &self,
        tile: &TileCoord,
        channel: Channel,
        content: &[u8],
        patch_id: u32,
    ) -> Result<(), StoreError> {
        let final_path = version_path(&self.cache_dir, tile, channel, VersionId::Patch(patch_id));
        let tmp_path = final_path.with_extension("png.tmp");
        let mut file = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        file.write_all(content).map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
        fs::rename(&tmp_path, &final_path).map_err(|e| io_err(&final_path, e))?;
        debug!(tile = %tile, channel = %channel, patch_id, "staged version");
        Ok(())
    }

    /// Remove a staged version after an aborted request. Best effort.
    pub fn discard_staged(&self, tile: &TileCoord, channel: Channel, patch_id: u32) {
        let path = version_path(&self.cache_dir, tile, channel, VersionId::Patch(patch_id));
        if let Err(e) = fs::remove_file(&path) {
            debug!(path = %path.display(), error = %e, "could not discard staged version");
        }
        let tmp = path.with_extension("png.tmp");
        let _ = fs::remove_file(tmp);
    }

    /// Repoint the current file at a previously staged patch version.
    ///
    /// If no `_orig` archive exists yet the tile has never been edited and
    /// its pre-edit content is preserved first by renaming the current file
    /// to `_orig`; otherwise the current link is simply dropped. The staged
    /// version is then hard-linked under the current name.
    pub fn promote(
        &self,
        tile: &TileCoord,
        channel: Channel,
        patch_id: u32,
    ) -> Result<(), StoreError> {
        let current = current_path(&self.cache_dir, tile, channel);
        let orig = version_path(&self.cache_dir, tile, channel, VersionId::Orig);
        if !orig.exists() {
            fs::rename(&current, &orig).map_err(|e| io_err(&orig, e))?;
        } else {
            fs::remove_file(&current).map_err(|e| io_err(&current, e))?;
        }
        let staged = version_path(&self.cache_dir, tile, channel, VersionId::Patch(patch_id));
        fs::hard_link(&staged, &current).map_err(|e| io_err(&current, e))?;
        debug!(tile = %tile, channel = %channel, patch_id, "promoted version");
        Ok(())
    }

    /// Repoint the current file at a named archived version.
    ///
    /// # Errors
    ///
    /// [`StoreError::VersionNotFound`] when that version's file is absent.
    pub fn revert_to(
        &self,
        tile: &TileCoord,
        channel: Channel,
        version: VersionId,
    ) -> Result<(), StoreError> {
        let target = version_path(&self.cache_dir, tile, channel, version);
        if !target.exists() {
            return Err(StoreError::VersionNotFound {
                tile: *tile,
                channel,
                version,
            });
        }
        let current = current_path(&self.cache_dir, tile, channel);
        if current.exists() {
            fs::remove_file(&current).map_err(|e| io_err(&current, e))?;
        }
        fs::hard_link(&target, &current).map_err(|e| io_err(&current, e))?;
        debug!(tile = %tile, channel = %channel, %version, "reverted current");
        Ok(())
    }

    /// Delete a patch's archived version files for one tile.
    ///
    /// Used when the patch is dropped from history and can never be
    /// replayed; a leftover archive would let a later undo repoint the
    /// current file at a patch that no longer exists. An already-absent
    /// file is fine.
    pub fn remove_patch_versions(&self, tile: &TileCoord, patch_id: u32) -> Result<(), StoreError> {
        for channel in Channel::ALL {
            let path = version_path(&self.cache_dir, tile, channel, VersionId::Patch(patch_id));
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(tile = %tile, channel = %channel, patch_id, "removed archived version");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path, e)),
            }
        }
        Ok(())
    }

    /// Greatest archived patch version strictly below a threshold, or
    /// [`VersionId::Orig`] when none exists.
    ///
    /// Undo uses this to find what the current file must point at once the
    /// threshold patch is taken out.
    pub fn latest_version_below(
        &self,
        tile: &TileCoord,
        channel: Channel,
        threshold: u32,
    ) -> Result<VersionId, StoreError> {
        let dir = tile_directory(&self.cache_dir, tile);
        let entries = fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        let mut best: Option<u32> = None;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let name = entry.file_name();
            if let Some(id) = parse_version_filename(&name.to_string_lossy(), channel) {
                if id < threshold && best.map_or(true, |b| b < id) {
                    best = Some(id);
                }
            }
        }
        Ok(best.map(VersionId::Patch).unwrap_or(VersionId::Orig))
    }

    /// Restore a tile to its pre-edit content and drop all patch versions.
    ///
    /// A channel without an `_orig` archive was never edited and is left
    /// alone. Every numbered version file of both channels is deleted.
    pub fn clear_tile(&self, tile: &TileCoord) -> Result<(), StoreError> {
        for channel in Channel::ALL {
            match self.revert_to(tile, channel, VersionId::Orig) {
                Ok(()) => {}
                Err(StoreError::VersionNotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        let dir = tile_directory(&self.cache_dir, tile);
        let entries = fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let numbered = Channel::ALL
                .iter()
                .any(|&c| parse_version_filename(&name, c).is_some());
            if numbered {
                let path = entry.path();
                fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            }
        }
        Ok(())
    }
}
