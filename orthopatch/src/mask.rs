//! Per-tile mask rasterization.
//!
//! Turns the polygons of a patch request into a binary occupancy mask for
//! one tile: a scanline even-odd fill over the rings projected through
//! [`pyramid::world_to_tile_pixel`]. The buffer is RGBA so the compositor
//! and the emptiness check both read occupancy from the alpha channel at a
//! 4-byte stride, and it carries one extra top row (the rasterization
//! margin) that is never counted as tile content.

use crate::geojson::Feature;
use crate::pyramid::{self, PyramidConfig, TileCoord, MASK_MARGIN_ROWS};

const BYTES_PER_PIXEL: usize = 4;

/// Binary occupancy mask for one tile.
///
/// `width` x `height` is the tile payload; the backing buffer holds
/// [`MASK_MARGIN_ROWS`] additional rows at the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl TileMask {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        let rows = height + MASK_MARGIN_ROWS;
        TileMask {
            width,
            height,
            data: vec![0u8; width as usize * rows as usize * BYTES_PER_PIXEL],
        }
    }

    /// Tile payload width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Tile payload height in pixels, margin excluded.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether the payload pixel `(x, y)` is covered by the patch.
    ///
    /// `y` is a payload row; the margin offset is applied internally.
    #[inline]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        debug_assert!(x < self.width && y < self.height);
        let row = (y + MASK_MARGIN_ROWS) as usize;
        let idx = (row * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        self.data[idx + 3] != 0
    }

    /// Mark one payload pixel. Test helper for the compositor.
    #[cfg(test)]
    pub(crate) fn mark(&mut self, x: u32, y: u32) {
        let row = (y + MASK_MARGIN_ROWS) as usize;
        let idx = (row * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        self.data[idx..idx + BYTES_PER_PIXEL].fill(255);
    }

    /// Fill `[x_start, x_end)` on a buffer row (margin row included in the
    /// addressing), clipped to the tile width.
    fn fill_span(&mut self, buffer_row: i64, x_start: i64, x_end: i64) {
        let rows = (self.height + MASK_MARGIN_ROWS) as i64;
        if buffer_row < 0 || buffer_row >= rows {
            return;
        }
        let x_start = x_start.clamp(0, self.width as i64) as usize;
        let x_end = x_end.clamp(0, self.width as i64) as usize;
        let row_base = buffer_row as usize * self.width as usize;
        for x in x_start..x_end {
            let idx = (row_base + x) * BYTES_PER_PIXEL;
            self.data[idx..idx + BYTES_PER_PIXEL].fill(255);
        }
    }

    /// Whether no payload pixel is covered.
    ///
    /// Scans the alpha channel at a 4-byte stride, starting one full margin
    /// row into the buffer so that fill artifacts on row 0 never count as
    /// coverage.
    fn is_empty(&self) -> bool {
        let start = self.width as usize * MASK_MARGIN_ROWS as usize * BYTES_PER_PIXEL;
        self.data[start..]
            .chunks_exact(BYTES_PER_PIXEL)
            .all(|px| px[3] == 0)
    }
}

/// Rasterize the features of a patch request into a mask for one tile.
///
/// Every feature's exterior ring is projected into the tile's pixel grid
/// and filled; the resulting coverages are unioned. Returns `None` when no
/// payload pixel ends up covered, in which case the tile must not be
/// composited or committed.
///
/// The fill is deterministic: ring vertices are rounded to integers by the
/// projection, scanlines are sampled at the same offsets on every call, and
/// crossings are ordered with a total ordering on `f64`.
pub fn rasterize(
    tile: &TileCoord,
    features: &[Feature],
    config: &PyramidConfig,
) -> Option<TileMask> {
    let mut mask = TileMask::new(config.tile_width, config.tile_height);
    for feature in features {
        let ring: Vec<(f64, f64)> = feature
            .geometry
            .exterior()
            .iter()
            .map(|point| {
                let (i, j) = pyramid::world_to_tile_pixel(*point, tile, config);
                (i as f64, j as f64)
            })
            .collect();
        fill_ring(&mut mask, &ring);
    }
    if mask.is_empty() {
        None
    } else {
        Some(mask)
    }
}

/// Even-odd scanline fill of one closed ring.
///
/// Each buffer row is sampled at its vertical center; a pixel is filled
/// when its horizontal center lies between an odd-even pair of edge
/// crossings. Horizontal edges never cross a sample line and drop out
/// naturally.
fn fill_ring(mask: &mut TileMask, ring: &[(f64, f64)]) {
    if ring.len() < 3 {
        return;
    }
    let rows = mask.height + MASK_MARGIN_ROWS;
    let mut crossings: Vec<f64> = Vec::new();
    for row in 0..rows as i64 {
        let sample_y = row as f64 + 0.5;
        crossings.clear();
        for k in 0..ring.len() {
            let (x0, y0) = ring[k];
            let (x1, y1) = ring[(k + 1) % ring.len()];
            if (y0 <= sample_y && y1 > sample_y) || (y1 <= sample_y && y0 > sample_y) {
                let t = (sample_y - y0) / (y1 - y0);
                crossings.push(x0 + t * (x1 - x0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            // First pixel whose center is at or right of the entry crossing,
            // first pixel whose center is at or right of the exit crossing.
            let start = (pair[0] - 0.5).ceil() as i64;
            let end = (pair[1] - 0.5).ceil() as i64;
            mask.fill_span(row, start, end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geojson::{Feature, Geometry, Properties};
    use crate::pyramid::PyramidConfig;

    fn config() -> PyramidConfig {
        PyramidConfig {
            x_origin: 0.0,
            y_origin: 0.0,
            resolution: 1.0,
            level_min: 0,
            level_max: 0,
            tile_width: 16,
            tile_height: 16,
        }
    }

    fn tile() -> TileCoord {
        TileCoord { z: 0, x: 0, y: 0 }
    }

    fn polygon(ring: Vec<[f64; 2]>) -> Feature {
        Feature {
            kind: "Feature".to_string(),
            geometry: Geometry {
                kind: "Polygon".to_string(),
                coordinates: vec![ring],
            },
            properties: Properties {
                color: [0, 255, 0],
                source_image: "opi".to_string(),
                patch_id: None,
                tiles: None,
            },
        }
    }

    /// A square in world coordinates; y is negative below the origin.
    fn square(x0: f64, y_top: f64, size: f64) -> Feature {
        polygon(vec![
            [x0, y_top],
            [x0 + size, y_top],
            [x0 + size, y_top - size],
            [x0, y_top - size],
            [x0, y_top],
        ])
    }

    #[test]
    fn test_square_fills_interior_only() {
        let features = vec![square(4.0, -4.0, 8.0)];
        let mask = rasterize(&tile(), &features, &config()).unwrap();
        assert!(mask.is_set(6, 6));
        assert!(mask.is_set(4, 4));
        assert!(mask.is_set(11, 11));
        assert!(!mask.is_set(3, 6));
        assert!(!mask.is_set(12, 6));
        assert!(!mask.is_set(6, 3));
        assert!(!mask.is_set(0, 0));
        assert!(!mask.is_set(15, 15));
    }

    #[test]
    fn test_two_features_union() {
        let features = vec![square(0.0, 0.0, 4.0), square(10.0, -10.0, 4.0)];
        let mask = rasterize(&tile(), &features, &config()).unwrap();
        assert!(mask.is_set(1, 1));
        assert!(mask.is_set(11, 11));
        assert!(!mask.is_set(6, 6));
    }

    #[test]
    fn test_zero_area_ring_yields_no_mask() {
        let point = [5.0, -5.0];
        let features = vec![polygon(vec![point, point, point, point])];
        assert!(rasterize(&tile(), &features, &config()).is_none());
    }

    #[test]
    fn test_polygon_outside_tile_yields_no_mask() {
        let features = vec![square(100.0, -100.0, 8.0)];
        assert!(rasterize(&tile(), &features, &config()).is_none());
    }

    #[test]
    fn test_coverage_confined_to_margin_row_counts_as_empty() {
        // A sliver just above the tile's top edge projects onto buffer row 0
        // only. The margin row absorbs it and the mask reports empty.
        let features = vec![polygon(vec![
            [2.0, 1.0],
            [14.0, 1.0],
            [14.0, 0.4],
            [2.0, 0.4],
            [2.0, 1.0],
        ])];
        assert!(rasterize(&tile(), &features, &config()).is_none());
    }

    #[test]
    fn test_rasterization_is_deterministic() {
        let features = vec![
            square(2.0, -1.0, 9.0),
            polygon(vec![
                [3.3, -2.7],
                [14.9, -5.1],
                [8.2, -13.6],
                [3.3, -2.7],
            ]),
        ];
        let first = rasterize(&tile(), &features, &config()).unwrap();
        let second = rasterize(&tile(), &features, &config()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mask_spans_clip_at_tile_edges() {
        // Polygon much larger than the tile covers the whole payload.
        let features = vec![square(-10.0, 10.0, 40.0)];
        let mask = rasterize(&tile(), &features, &config()).unwrap();
        for y in 0..16 {
            for x in 0..16 {
                assert!(mask.is_set(x, y), "pixel ({x},{y}) should be covered");
            }
        }
    }
}
