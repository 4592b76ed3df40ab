//! Pyramid type definitions

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filename of the pyramid descriptor inside a cache directory.
pub const PYRAMID_DESCRIPTOR: &str = "overviews.json";

/// Number of extra rows prepended to every rasterized mask.
///
/// The polygon fill is unreliable on the very first row of a canvas, so every
/// projected pixel row is shifted down by this amount and the top row is kept
/// as a margin that is never treated as tile content.
pub const MASK_MARGIN_ROWS: u32 = 1;

/// Tile coordinates in the mosaic pyramid.
///
/// A tile holds one "graph" (styling) and one "ortho" (photographic) image.
/// `x` grows eastward and `y` southward from the pyramid origin; both can go
/// negative for geometry west or north of the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column index at this level
    pub x: i32,
    /// Row index at this level
    pub y: i32,
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.y, self.x)
    }
}

/// Wire shape of a tile reference in the persisted patch logs.
///
/// The logs store all three indices as strings.
#[derive(Serialize, Deserialize)]
struct TileCoordWire {
    x: String,
    y: String,
    z: String,
}

impl Serialize for TileCoord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TileCoordWire {
            x: self.x.to_string(),
            y: self.y.to_string(),
            z: self.z.to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TileCoord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = TileCoordWire::deserialize(deserializer)?;
        let parse_i32 = |field: &str, value: &str| {
            value
                .parse::<i32>()
                .map_err(|_| serde::de::Error::custom(format!("invalid tile {field}: {value:?}")))
        };
        Ok(TileCoord {
            z: wire
                .z
                .parse::<u32>()
                .map_err(|_| serde::de::Error::custom(format!("invalid tile z: {:?}", wire.z)))?,
            x: parse_i32("x", &wire.x)?,
            y: parse_i32("y", &wire.y)?,
        })
    }
}

/// Axis-aligned bounding box in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// Errors raised by pure geometry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// A bounding box was requested for an empty feature collection
    #[error("cannot compute a bounding box for an empty feature collection")]
    EmptyFeatureCollection,
}

/// Errors raised while loading or validating a pyramid descriptor.
#[derive(Debug, Error)]
pub enum PyramidError {
    /// Descriptor file could not be read
    #[error("cannot read pyramid descriptor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Descriptor is not valid JSON or misses required fields
    #[error("malformed pyramid descriptor: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Minimum level above maximum level
    #[error("invalid pyramid level range: min {min} > max {max}")]
    InvalidLevelRange { min: u32, max: u32 },

    /// Zero-sized tiles
    #[error("invalid tile size {width}x{height}")]
    InvalidTileSize { width: u32, height: u32 },

    /// Non-positive ground resolution
    #[error("invalid pyramid resolution {0}")]
    InvalidResolution(f64),
}

/// Immutable description of a tile pyramid.
///
/// Loaded once per cache directory from its `overviews.json` descriptor.
/// The origin is the upper-left corner of the pyramid extent; `resolution`
/// is the ground size of one pixel at the deepest level, and each level up
/// doubles it.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidConfig {
    pub x_origin: f64,
    pub y_origin: f64,
    pub resolution: f64,
    pub level_min: u32,
    pub level_max: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

/// On-disk shape of `overviews.json` as written by the cache builder.
#[derive(Deserialize)]
struct OverviewsDoc {
    crs: CrsDoc,
    resolution: f64,
    level: LevelDoc,
    #[serde(rename = "tileSize")]
    tile_size: TileSizeDoc,
}

#[derive(Deserialize)]
struct CrsDoc {
    #[serde(rename = "boundingBox")]
    bounding_box: BoundingBoxDoc,
}

#[derive(Deserialize)]
struct BoundingBoxDoc {
    xmin: f64,
    ymax: f64,
}

#[derive(Deserialize)]
struct LevelDoc {
    min: u32,
    max: u32,
}

#[derive(Deserialize)]
struct TileSizeDoc {
    width: u32,
    height: u32,
}

impl PyramidConfig {
    /// Load and validate the descriptor from a cache directory file.
    pub fn from_file(path: &Path) -> Result<Self, PyramidError> {
        let text = fs::read_to_string(path).map_err(|source| PyramidError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate the nested descriptor document.
    pub fn from_json(text: &str) -> Result<Self, PyramidError> {
        let doc: OverviewsDoc = serde_json::from_str(text)?;
        let config = PyramidConfig {
            x_origin: doc.crs.bounding_box.xmin,
            y_origin: doc.crs.bounding_box.ymax,
            resolution: doc.resolution,
            level_min: doc.level.min,
            level_max: doc.level.max,
            tile_width: doc.tile_size.width,
            tile_height: doc.tile_size.height,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PyramidError> {
        if self.level_min > self.level_max {
            return Err(PyramidError::InvalidLevelRange {
                min: self.level_min,
                max: self.level_max,
            });
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(PyramidError::InvalidTileSize {
                width: self.tile_width,
                height: self.tile_height,
            });
        }
        if !(self.resolution > 0.0) {
            return Err(PyramidError::InvalidResolution(self.resolution));
        }
        Ok(())
    }

    /// Ground resolution at a zoom level.
    ///
    /// `resolution_at(level) = resolution * 2^(level_max - level)`.
    #[inline]
    pub fn resolution_at(&self, level: u32) -> f64 {
        self.resolution * f64::powi(2.0, (self.level_max - level) as i32)
    }
}
