//! Mask-driven image compositing.
//!
//! Pure pixel merges: given a tile mask, either repaint the graph layer
//! with a flat color or replace ortho pixels with the corresponding pixels
//! of a source image. Both functions return a new buffer and never touch
//! the filesystem.

use crate::mask::TileMask;
use image::RgbaImage;
use thiserror::Error;

/// Compositing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositeError {
    /// Mask payload and image dimensions disagree
    #[error("dimension mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },
}

fn check_dimensions(mask: &TileMask, image: &RgbaImage) -> Result<(), CompositeError> {
    if image.dimensions() != (mask.width(), mask.height()) {
        return Err(CompositeError::DimensionMismatch {
            expected_width: mask.width(),
            expected_height: mask.height(),
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(())
}

/// Repaint the RGB channels of a graph tile with `color` under the mask.
///
/// The alpha channel and every unmasked pixel are left untouched.
pub fn composite_graph(
    mask: &TileMask,
    graph: &RgbaImage,
    color: [u8; 3],
) -> Result<RgbaImage, CompositeError> {
    check_dimensions(mask, graph)?;
    let mut out = graph.clone();
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            if mask.is_set(x, y) {
                let pixel = out.get_pixel_mut(x, y);
                pixel.0[0] = color[0];
                pixel.0[1] = color[1];
                pixel.0[2] = color[2];
            }
        }
    }
    Ok(out)
}

/// Replace the RGB channels of an ortho tile with the source image's pixels
/// under the mask.
///
/// Source and ortho are sampled at identical coordinates; alpha and
/// unmasked pixels are left untouched.
pub fn composite_ortho(
    mask: &TileMask,
    ortho: &RgbaImage,
    source: &RgbaImage,
) -> Result<RgbaImage, CompositeError> {
    check_dimensions(mask, ortho)?;
    check_dimensions(mask, source)?;
    let mut out = ortho.clone();
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            if mask.is_set(x, y) {
                let src = source.get_pixel(x, y);
                let pixel = out.get_pixel_mut(x, y);
                pixel.0[0] = src.0[0];
                pixel.0[1] = src.0[1];
                pixel.0[2] = src.0[2];
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn mask_with(width: u32, height: u32, pixels: &[(u32, u32)]) -> TileMask {
        let mut mask = TileMask::new(width, height);
        for &(x, y) in pixels {
            mask.mark(x, y);
        }
        mask
    }

    #[test]
    fn test_graph_recolored_under_mask_only() {
        let mask = mask_with(4, 4, &[(1, 1), (2, 3)]);
        let graph = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 200]));

        let out = composite_graph(&mask, &graph, [255, 0, 0]).unwrap();

        assert_eq!(out.get_pixel(1, 1).0, [255, 0, 0, 200]);
        assert_eq!(out.get_pixel(2, 3).0, [255, 0, 0, 200]);
        assert_eq!(out.get_pixel(0, 0).0, [10, 20, 30, 200]);
        assert_eq!(out.get_pixel(3, 3).0, [10, 20, 30, 200]);
    }

    #[test]
    fn test_graph_alpha_preserved() {
        let mask = mask_with(2, 2, &[(0, 0)]);
        let graph = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 77]));

        let out = composite_graph(&mask, &graph, [9, 9, 9]).unwrap();

        assert_eq!(out.get_pixel(0, 0).0[3], 77);
    }

    #[test]
    fn test_ortho_takes_source_pixels_under_mask() {
        let mask = mask_with(3, 3, &[(0, 2), (2, 0)]);
        let ortho = RgbaImage::from_pixel(3, 3, Rgba([0, 0, 0, 255]));
        let source = RgbaImage::from_fn(3, 3, |x, y| Rgba([x as u8, y as u8, 99, 128]));

        let out = composite_ortho(&mask, &ortho, &source).unwrap();

        assert_eq!(out.get_pixel(0, 2).0, [0, 2, 99, 255]);
        assert_eq!(out.get_pixel(2, 0).0, [2, 0, 99, 255]);
        assert_eq!(out.get_pixel(1, 1).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_graph_dimension_mismatch_rejected() {
        let mask = mask_with(4, 4, &[]);
        let graph = RgbaImage::new(4, 5);

        let err = composite_graph(&mask, &graph, [0, 0, 0]).unwrap_err();

        assert_eq!(
            err,
            CompositeError::DimensionMismatch {
                expected_width: 4,
                expected_height: 4,
                width: 4,
                height: 5,
            }
        );
    }

    #[test]
    fn test_ortho_source_dimension_mismatch_rejected() {
        let mask = mask_with(4, 4, &[]);
        let ortho = RgbaImage::new(4, 4);
        let source = RgbaImage::new(2, 2);

        assert!(composite_ortho(&mask, &ortho, &source).is_err());
    }

    #[test]
    fn test_compositors_do_not_mutate_inputs() {
        let mask = mask_with(2, 2, &[(1, 0)]);
        let graph = RgbaImage::from_pixel(2, 2, Rgba([5, 5, 5, 255]));
        let before = graph.clone();

        let _ = composite_graph(&mask, &graph, [200, 100, 50]).unwrap();

        assert_eq!(graph, before);
    }
}
