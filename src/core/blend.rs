//! Overlap-aware merge of an enhanced tile into the output image.
//!
//! A tile that is not in the first column blends its left band against the
//! content already written by its left neighbour; a tile that is not in the
//! first row does the same for its top band. Weights ramp linearly,
//! `alpha(i) = i / B`, from the existing content (i = 0) towards the
//! incoming tile. The left band is applied first and the top band second,
//! so corners carry the top ramp last, matching the row-major scan. The
//! rest of the tile is copied directly.

use crate::core::buffer::{ImageBuffer, Region, Sample};
use crate::error::TilingError;

/// Enhanced pixels for one tile plus where they land on the output.
#[derive(Debug, Clone)]
pub struct EnhancedTile<S = u8> {
    pub index: usize,
    /// Destination bounds on the output image.
    pub dest: Region,
    /// Width of the left blend band, in output pixels.
    pub left_band: u32,
    /// Height of the top blend band, in output pixels.
    pub top_band: u32,
    pub pixels: ImageBuffer<S>,
}

impl<S: Sample> EnhancedTile<S> {
    /// Enhanced sample for destination offset `(dx, dy)`.
    ///
    /// Reads clamp to the last row/column: with fractional scales the
    /// destination extent can exceed the enhanced extent by one pixel.
    #[inline]
    fn incoming(&self, dx: u32, dy: u32) -> &[S] {
        let x = dx.min(self.pixels.width() - 1);
        let y = dy.min(self.pixels.height() - 1);
        self.pixels.pixel(x, y)
    }
}

#[inline]
fn mix<S: Sample>(existing: &mut [S], incoming: &[S], alpha: f32) {
    for (e, &i) in existing.iter_mut().zip(incoming) {
        // existing * (1 - alpha) + incoming * alpha, exact when both agree
        let v = e.to_f32();
        *e = S::from_f32(v + (i.to_f32() - v) * alpha);
    }
}

/// Merge `tile` into `output`.
///
/// Band widths are clipped to the destination; a zero band degrades to a
/// plain copy.
pub fn merge_tile<S: Sample>(output: &mut ImageBuffer<S>, tile: &EnhancedTile<S>) -> Result<(), TilingError> {
    let dest = tile.dest;
    if tile.pixels.channels() != output.channels() {
        return Err(TilingError::invalid(format!(
            "tile {} has {} channels, output has {}",
            tile.index,
            tile.pixels.channels(),
            output.channels()
        )));
    }
    if dest.is_empty() || !dest.fits_within(output.width(), output.height()) {
        return Err(TilingError::invalid(format!(
            "tile {} destination {dest} is outside {}x{} output",
            tile.index,
            output.width(),
            output.height()
        )));
    }

    let left = tile.left_band.min(dest.width);
    let top = tile.top_band.min(dest.height);

    if left > 0 {
        for dy in 0..dest.height {
            for i in 0..left {
                let alpha = i as f32 / left as f32;
                let incoming = tile.incoming(i, dy);
                mix(output.pixel_mut(dest.x + i, dest.y + dy), incoming, alpha);
            }
        }
    }

    if top > 0 {
        for i in 0..top {
            let alpha = i as f32 / top as f32;
            for dx in 0..dest.width {
                let incoming = tile.incoming(dx, i);
                mix(output.pixel_mut(dest.x + dx, dest.y + i), incoming, alpha);
            }
        }
    }

    for dy in top..dest.height {
        for dx in left..dest.width {
            let incoming = tile.incoming(dx, dy);
            output.pixel_mut(dest.x + dx, dest.y + dy).copy_from_slice(incoming);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(index: usize, dest: Region, left: u32, top: u32, value: u8) -> EnhancedTile<u8> {
        EnhancedTile {
            index,
            dest,
            left_band: left,
            top_band: top,
            pixels: ImageBuffer::filled(dest.width, dest.height, &[value]).unwrap(),
        }
    }

    #[test]
    fn test_no_band_writes_directly() {
        let mut out = ImageBuffer::<u8>::new(4, 4, 1).unwrap();
        merge_tile(&mut out, &tile(0, Region::new(0, 0, 4, 4), 0, 0, 200)).unwrap();
        assert!(out.as_raw().iter().all(|&v| v == 200));
    }

    #[test]
    fn test_left_band_ramps_from_existing_to_incoming() {
        let mut out = ImageBuffer::<f32>::new(8, 1, 1).unwrap();
        let first = EnhancedTile {
            index: 0,
            dest: Region::new(0, 0, 6, 1),
            left_band: 0,
            top_band: 0,
            pixels: ImageBuffer::filled(6, 1, &[0.0f32]).unwrap(),
        };
        merge_tile(&mut out, &first).unwrap();
        let second = EnhancedTile {
            index: 1,
            dest: Region::new(2, 0, 6, 1),
            left_band: 4,
            top_band: 0,
            pixels: ImageBuffer::filled(6, 1, &[100.0f32]).unwrap(),
        };
        merge_tile(&mut out, &second).unwrap();
        assert_eq!(out.as_raw(), &[0.0, 0.0, 0.0, 25.0, 50.0, 75.0, 100.0, 100.0]);
    }

    #[test]
    fn test_top_band_applied_after_left_band() {
        let mut out = ImageBuffer::<f32>::filled(4, 4, &[0.0]).unwrap();
        let t = EnhancedTile {
            index: 3,
            dest: Region::new(0, 0, 4, 4),
            left_band: 2,
            top_band: 2,
            pixels: ImageBuffer::filled(4, 4, &[100.0f32]).unwrap(),
        };
        merge_tile(&mut out, &t).unwrap();
        // corner (1, 1): left ramp gives 50, top ramp then mixes 50 -> 100 at 0.5
        assert_eq!(out.pixel(1, 1), &[75.0]);
        // corner origin keeps the existing content
        assert_eq!(out.pixel(0, 0), &[0.0]);
        // top band outside the left band: plain top ramp
        assert_eq!(out.pixel(3, 1), &[50.0]);
        // left band below the top band: plain left ramp
        assert_eq!(out.pixel(1, 3), &[50.0]);
        assert_eq!(out.pixel(3, 3), &[100.0]);
    }

    #[test]
    fn test_flat_content_stays_flat() {
        let mut out = ImageBuffer::<u8>::new(10, 10, 3).unwrap();
        let a = EnhancedTile {
            index: 0,
            dest: Region::new(0, 0, 6, 10),
            left_band: 0,
            top_band: 0,
            pixels: ImageBuffer::filled(6, 10, &[40, 90, 200]).unwrap(),
        };
        let b = EnhancedTile {
            index: 1,
            dest: Region::new(4, 0, 6, 10),
            left_band: 2,
            top_band: 0,
            pixels: ImageBuffer::filled(6, 10, &[40, 90, 200]).unwrap(),
        };
        merge_tile(&mut out, &a).unwrap();
        merge_tile(&mut out, &b).unwrap();
        assert!(out.as_raw().chunks(3).all(|p| p == [40, 90, 200]));
    }

    #[test]
    fn test_band_clipped_to_destination() {
        let mut out = ImageBuffer::<u8>::filled(4, 2, &[0]).unwrap();
        merge_tile(&mut out, &tile(1, Region::new(2, 0, 2, 2), 8, 0, 100)).unwrap();
        // band of 8 clipped to 2: alpha 0 and 0.5
        assert_eq!(out.row(0), &[0, 0, 0, 50]);
    }

    #[test]
    fn test_destination_larger_than_pixels_clamps_reads() {
        let mut out = ImageBuffer::<u8>::new(3, 1, 1).unwrap();
        let t = EnhancedTile {
            index: 0,
            dest: Region::new(0, 0, 3, 1),
            left_band: 0,
            top_band: 0,
            pixels: ImageBuffer::from_vec(2, 1, 1, vec![10, 20]).unwrap(),
        };
        merge_tile(&mut out, &t).unwrap();
        assert_eq!(out.row(0), &[10, 20, 20]);
    }

    #[test]
    fn test_rejects_out_of_bounds_destination() {
        let mut out = ImageBuffer::<u8>::new(4, 4, 1).unwrap();
        let err = merge_tile(&mut out, &tile(2, Region::new(2, 2, 4, 4), 0, 0, 1)).unwrap_err();
        assert!(matches!(err, TilingError::InvalidDimension { .. }));
    }
}
