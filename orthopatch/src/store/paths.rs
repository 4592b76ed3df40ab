//! Cache path construction for versioned tile files.
//!
//! Layout per tile `(z, x, y)`:
//!
//! ```text
//! <cache_dir>/<z>/<y>/<x>/graph.png          current graph
//! <cache_dir>/<z>/<y>/<x>/ortho.png          current ortho
//! <cache_dir>/<z>/<y>/<x>/graph_orig.png     pre-edit archive
//! <cache_dir>/<z>/<y>/<x>/graph_<id>.png     per-patch archive
//! <cache_dir>/<z>/<y>/<x>/<source>.png       source images
//! ```

use crate::pyramid::TileCoord;
use crate::store::{Channel, VersionId};
use std::path::{Path, PathBuf};

/// Directory holding every file of one tile.
pub fn tile_directory(cache_dir: &Path, tile: &TileCoord) -> PathBuf {
    cache_dir
        .join(tile.z.to_string())
        .join(tile.y.to_string())
        .join(tile.x.to_string())
}

/// Path of the current file for a tile channel.
pub fn current_path(cache_dir: &Path, tile: &TileCoord, channel: Channel) -> PathBuf {
    tile_directory(cache_dir, tile).join(format!("{}.png", channel.as_str()))
}

/// Path of an archived version file for a tile channel.
pub fn version_path(
    cache_dir: &Path,
    tile: &TileCoord,
    channel: Channel,
    version: VersionId,
) -> PathBuf {
    tile_directory(cache_dir, tile).join(format!("{}_{}.png", channel.as_str(), version))
}

/// Path of a named source image within a tile directory.
pub fn source_path(cache_dir: &Path, tile: &TileCoord, source: &str) -> PathBuf {
    tile_directory(cache_dir, tile).join(format!("{source}.png"))
}

/// Parse an archived version filename for one channel.
///
/// Returns the patch id for `<channel>_<id>.png` names and `None` for the
/// current file, the `_orig` archive, other channels, and stray files.
pub fn parse_version_filename(name: &str, channel: Channel) -> Option<u32> {
    let stem = name
        .strip_prefix(channel.as_str())?
        .strip_prefix('_')?
        .strip_suffix(".png")?;
    stem.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile() -> TileCoord {
        TileCoord { z: 21, x: 100, y: 99 }
    }

    #[test]
    fn test_tile_directory_is_z_y_x() {
        let dir = tile_directory(Path::new("/cache"), &tile());
        assert_eq!(dir, PathBuf::from("/cache/21/99/100"));
    }

    #[test]
    fn test_current_path_per_channel() {
        let cache = Path::new("/cache");
        assert_eq!(
            current_path(cache, &tile(), Channel::Graph),
            PathBuf::from("/cache/21/99/100/graph.png")
        );
        assert_eq!(
            current_path(cache, &tile(), Channel::Ortho),
            PathBuf::from("/cache/21/99/100/ortho.png")
        );
    }

    #[test]
    fn test_version_path_orig_and_patch() {
        let cache = Path::new("/cache");
        assert_eq!(
            version_path(cache, &tile(), Channel::Graph, VersionId::Orig),
            PathBuf::from("/cache/21/99/100/graph_orig.png")
        );
        assert_eq!(
            version_path(cache, &tile(), Channel::Ortho, VersionId::Patch(7)),
            PathBuf::from("/cache/21/99/100/ortho_7.png")
        );
    }

    #[test]
    fn test_source_path() {
        let path = source_path(Path::new("/cache"), &tile(), "opi-2021");
        assert_eq!(path, PathBuf::from("/cache/21/99/100/opi-2021.png"));
    }

    #[test]
    fn test_parse_version_filename_accepts_numbered_archives_only() {
        assert_eq!(parse_version_filename("graph_12.png", Channel::Graph), Some(12));
        assert_eq!(parse_version_filename("ortho_3.png", Channel::Ortho), Some(3));
        assert_eq!(parse_version_filename("graph_orig.png", Channel::Graph), None);
        assert_eq!(parse_version_filename("graph.png", Channel::Graph), None);
        assert_eq!(parse_version_filename("graph_12.png", Channel::Ortho), None);
        assert_eq!(parse_version_filename("opi-2021.png", Channel::Graph), None);
        assert_eq!(parse_version_filename("graph_12.png.tmp", Channel::Graph), None);
    }
}
