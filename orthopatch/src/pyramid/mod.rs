//! Pyramid geometry
//!
//! Pure math mapping world coordinates to tile indices and pixel offsets in
//! a multi-resolution tile pyramid: bounding boxes of polygon edits, the set
//! of tiles a bounding box touches at every zoom level, and the projection
//! of a world point into a tile's pixel grid.

mod types;

pub use types::{
    BBox, GeometryError, PyramidConfig, PyramidError, TileCoord, MASK_MARGIN_ROWS,
    PYRAMID_DESCRIPTOR,
};

use crate::geojson::Feature;
use std::collections::BTreeSet;

/// Compute the bounding box of the exterior rings of a set of features.
///
/// # Errors
///
/// Returns [`GeometryError::EmptyFeatureCollection`] when no feature carries
/// any point.
pub fn bounding_box(features: &[Feature]) -> Result<BBox, GeometryError> {
    let mut bbox: Option<BBox> = None;
    for feature in features {
        for point in feature.geometry.exterior() {
            bbox = Some(match bbox {
                None => BBox {
                    xmin: point[0],
                    ymin: point[1],
                    xmax: point[0],
                    ymax: point[1],
                },
                Some(b) => BBox {
                    xmin: b.xmin.min(point[0]),
                    ymin: b.ymin.min(point[1]),
                    xmax: b.xmax.max(point[0]),
                    ymax: b.ymax.max(point[1]),
                },
            });
        }
    }
    bbox.ok_or(GeometryError::EmptyFeatureCollection)
}

/// Enumerate every tile whose footprint intersects a bounding box, at every
/// level of the pyramid.
///
/// At each level the index ranges are half-open: `floor` on the near edge,
/// `ceil` on the far edge, tiles emitted for `[x0, x1) x [y0, y1)`. A
/// degenerate bounding box sitting exactly on a tile boundary yields an
/// empty set.
pub fn affected_tiles(bbox: &BBox, config: &PyramidConfig) -> BTreeSet<TileCoord> {
    let mut tiles = BTreeSet::new();
    for level in config.level_min..=config.level_max {
        let resolution = config.resolution_at(level);
        let span_x = resolution * config.tile_width as f64;
        let span_y = resolution * config.tile_height as f64;
        let x0 = ((bbox.xmin - config.x_origin) / span_x).floor() as i32;
        let x1 = ((bbox.xmax - config.x_origin) / span_x).ceil() as i32;
        let y0 = ((config.y_origin - bbox.ymax) / span_y).floor() as i32;
        let y1 = ((config.y_origin - bbox.ymin) / span_y).ceil() as i32;
        for y in y0..y1 {
            for x in x0..x1 {
                tiles.insert(TileCoord { z: level, x, y });
            }
        }
    }
    tiles
}

/// Project a world point into the pixel grid of a tile.
///
/// Returns `(i, j)` where `i` is the column and `j` the row in the tile's
/// mask buffer. `j` already includes the [`MASK_MARGIN_ROWS`] offset, so row
/// 0 of the buffer is never addressed by a point on the tile itself. Points
/// outside the tile produce out-of-range indices; callers clip.
#[inline]
pub fn world_to_tile_pixel(point: [f64; 2], tile: &TileCoord, config: &PyramidConfig) -> (i64, i64) {
    let resolution = config.resolution_at(tile.z);
    let tile_span_x = tile.x as f64 * config.tile_width as f64 * resolution;
    let tile_span_y = tile.y as f64 * config.tile_height as f64 * resolution;
    let i = ((point[0] - config.x_origin - tile_span_x) / resolution).round() as i64;
    let j = ((config.y_origin - point[1] - tile_span_y) / resolution).round() as i64
        + MASK_MARGIN_ROWS as i64;
    (i, j)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geojson::{Feature, Geometry, Properties};

    fn config() -> PyramidConfig {
        PyramidConfig {
            x_origin: 0.0,
            y_origin: 0.0,
            resolution: 0.05,
            level_min: 18,
            level_max: 21,
            tile_width: 256,
            tile_height: 256,
        }
    }

    fn polygon(ring: Vec<[f64; 2]>) -> Feature {
        Feature {
            kind: "Feature".to_string(),
            geometry: Geometry {
                kind: "Polygon".to_string(),
                coordinates: vec![ring],
            },
            properties: Properties {
                color: [255, 0, 0],
                source_image: "opi".to_string(),
                patch_id: None,
                tiles: None,
            },
        }
    }

    #[test]
    fn test_bounding_box_spans_all_features() {
        let features = vec![
            polygon(vec![[1.0, 2.0], [3.0, 4.0], [1.0, 4.0], [1.0, 2.0]]),
            polygon(vec![[-5.0, 0.0], [0.0, 9.0], [-5.0, 9.0], [-5.0, 0.0]]),
        ];
        let bbox = bounding_box(&features).unwrap();
        assert_eq!(bbox.xmin, -5.0);
        assert_eq!(bbox.ymin, 0.0);
        assert_eq!(bbox.xmax, 3.0);
        assert_eq!(bbox.ymax, 9.0);
    }

    #[test]
    fn test_bounding_box_of_nothing_is_an_error() {
        assert_eq!(
            bounding_box(&[]).unwrap_err(),
            GeometryError::EmptyFeatureCollection
        );
        // A feature without any ring is just as empty.
        let mut feature = polygon(vec![]);
        feature.geometry.coordinates.clear();
        assert_eq!(
            bounding_box(&[feature]).unwrap_err(),
            GeometryError::EmptyFeatureCollection
        );
    }

    #[test]
    fn test_affected_tiles_single_level_square() {
        let mut config = config();
        config.level_min = 21;
        // Tile (21, 100, 100) spans x [1280, 1292.8), y (-1292.8, -1280].
        let bbox = BBox {
            xmin: 1283.0,
            ymin: -1290.0,
            xmax: 1290.0,
            ymax: -1283.0,
        };
        let tiles = affected_tiles(&bbox, &config);
        assert_eq!(tiles.len(), 1);
        assert!(tiles.contains(&TileCoord { z: 21, x: 100, y: 100 }));
    }

    #[test]
    fn test_affected_tiles_covers_every_level() {
        let bbox = BBox {
            xmin: 1283.0,
            ymin: -1290.0,
            xmax: 1290.0,
            ymax: -1283.0,
        };
        let tiles = affected_tiles(&bbox, &config());
        // One tile per level for a bbox smaller than the coarsest tile.
        assert_eq!(tiles.len(), 4);
        assert!(tiles.contains(&TileCoord { z: 21, x: 100, y: 100 }));
        assert!(tiles.contains(&TileCoord { z: 20, x: 50, y: 50 }));
        assert!(tiles.contains(&TileCoord { z: 19, x: 25, y: 25 }));
        assert!(tiles.contains(&TileCoord { z: 18, x: 12, y: 12 }));
    }

    #[test]
    fn test_affected_tiles_degenerate_bbox_on_boundary_is_empty() {
        let mut config = config();
        config.level_min = 21;
        // Exactly on the boundary between tiles 99 and 100.
        let bbox = BBox {
            xmin: 1280.0,
            ymin: -1280.0,
            xmax: 1280.0,
            ymax: -1280.0,
        };
        assert!(affected_tiles(&bbox, &config).is_empty());
    }

    #[test]
    fn test_affected_tiles_matches_footprint_intersection_oracle() {
        let config = PyramidConfig {
            x_origin: 1000.0,
            y_origin: 2000.0,
            resolution: 0.5,
            level_min: 10,
            level_max: 12,
            tile_width: 128,
            tile_height: 64,
        };
        let boxes = [
            BBox { xmin: 1003.7, ymin: 1821.4, xmax: 1217.2, ymax: 1999.1 },
            BBox { xmin: 937.25, ymin: 1900.0, xmax: 1001.5, ymax: 2050.75 },
            BBox { xmin: 1064.0, ymin: 1968.0, xmax: 1065.1, ymax: 1968.3 },
            BBox { xmin: 1500.3, ymin: 1400.9, xmax: 1807.6, ymax: 1702.2 },
        ];
        for bbox in boxes {
            let tiles = affected_tiles(&bbox, &config);
            for level in config.level_min..=config.level_max {
                let resolution = config.resolution_at(level);
                let span_x = resolution * config.tile_width as f64;
                let span_y = resolution * config.tile_height as f64;
                // Brute-force scan of a window comfortably wider than the bbox.
                for x in -64i32..64 {
                    for y in -64i32..64 {
                        let tile_xmin = config.x_origin + x as f64 * span_x;
                        let tile_xmax = tile_xmin + span_x;
                        let tile_ymax = config.y_origin - y as f64 * span_y;
                        let tile_ymin = tile_ymax - span_y;
                        let intersects = tile_xmin < bbox.xmax
                            && tile_xmax > bbox.xmin
                            && tile_ymin < bbox.ymax
                            && tile_ymax > bbox.ymin;
                        let emitted = tiles.contains(&TileCoord { z: level, x, y });
                        assert_eq!(
                            emitted, intersects,
                            "tile z={level} x={x} y={y} bbox={bbox:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_world_to_tile_pixel_includes_margin_row() {
        let config = config();
        let tile = TileCoord { z: 21, x: 100, y: 100 };
        // Upper-left corner of the tile lands on pixel (0, 0), shifted one
        // row down into the mask buffer.
        let (i, j) = world_to_tile_pixel([1280.0, -1280.0], &tile, &config);
        assert_eq!((i, j), (0, 1));
        // One resolution step east and south moves exactly one pixel.
        let (i, j) = world_to_tile_pixel([1280.05, -1280.05], &tile, &config);
        assert_eq!((i, j), (1, 2));
    }

    #[test]
    fn test_world_to_tile_pixel_outside_tile_goes_out_of_range() {
        let config = config();
        let tile = TileCoord { z: 21, x: 100, y: 100 };
        let (i, j) = world_to_tile_pixel([1279.0, -1279.0], &tile, &config);
        assert_eq!(i, -20);
        assert_eq!(j, -19);
    }
}
