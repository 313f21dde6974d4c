//! Classical super-resolution without a learned model.
//!
//! Chain: Lanczos resize, 3×3 unsharp sharpen, bilateral denoise, CLAHE on
//! luma, final Gaussian unsharp mask. Alpha is resized on its own and
//! re-attached untouched by the colour stages.

use tracing::trace;

use crate::core::buffer::{join_last_channel, split_last_channel, ImageBuffer};
use crate::core::color::{luma_plane, replace_luma};
use crate::core::contrast::{clahe, ClaheParams};
use crate::core::denoise::{bilateral_filter, BilateralParams};
use crate::core::scale::Scale;
use crate::core::sharpen::{unsharp_mask_3x3, unsharp_mask_gaussian};
use crate::core::{fir_resize, ResampleFilter};
use crate::enhance::{expected_size, EnhanceOperator};
use crate::error::EnhanceError;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassicalOptions {
    pub filter: ResampleFilter,
    /// Strength of the 3×3 unsharp pass, `None` to skip it.
    pub sharpen: Option<f32>,
    pub denoise: Option<BilateralParams>,
    pub contrast: Option<ClaheParams>,
    /// `(sigma, amount)` of the final unsharp mask.
    pub detail: Option<(f32, f32)>,
}

impl Default for ClassicalOptions {
    fn default() -> Self {
        Self {
            filter: ResampleFilter::Lanczos3,
            sharpen: Some(0.3),
            denoise: Some(BilateralParams::default()),
            contrast: Some(ClaheParams::default()),
            detail: Some((2.0, 0.5)),
        }
    }
}

impl ClassicalOptions {
    /// Resize only, every filter stage disabled.
    pub fn resize_only(filter: ResampleFilter) -> Self {
        Self {
            filter,
            sharpen: None,
            denoise: None,
            contrast: None,
            detail: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassicalEnhancer {
    options: ClassicalOptions,
}

impl ClassicalEnhancer {
    pub fn new(options: ClassicalOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ClassicalOptions {
        &self.options
    }

    /// Run the filter chain over colour (or gray) samples already at the
    /// target size.
    fn refine(&self, mut px: Vec<u8>, w: u32, h: u32, channels: usize) -> Vec<u8> {
        let opts = &self.options;
        if let Some(strength) = opts.sharpen {
            px = unsharp_mask_3x3(&px, w, h, channels, strength);
        }
        if let Some(params) = opts.denoise {
            px = bilateral_filter(&px, w, h, channels, params);
        }
        if let Some(params) = opts.contrast {
            let luma = luma_plane(&px, channels);
            let equalized = clahe(&luma, w, h, params);
            replace_luma(&mut px, channels, &equalized);
        }
        if let Some((sigma, amount)) = opts.detail {
            px = unsharp_mask_gaussian(&px, w, h, channels, sigma, amount);
        }
        px
    }
}

impl EnhanceOperator<u8> for ClassicalEnhancer {
    fn name(&self) -> &str {
        "classical"
    }

    fn enhance(&self, tile: &ImageBuffer<u8>, scale: Scale) -> Result<ImageBuffer<u8>, EnhanceError> {
        let (w, h) = tile.dimensions();
        let (dw, dh) = expected_size(w, h, scale);
        let channels = tile.channels() as usize;
        let filter = self.options.filter;
        trace!(w, h, dw, dh, channels, "classical enhance");

        let data = match channels {
            1 | 3 => {
                let up = fir_resize(tile.as_raw(), channels, w, h, dw, dh, filter)?;
                self.refine(up, dw, dh, channels)
            }
            2 | 4 => {
                let (color, alpha) = split_last_channel(tile.as_raw(), channels);
                let cc = channels - 1;
                let color_up = fir_resize(&color, cc, w, h, dw, dh, filter)?;
                let alpha_up = fir_resize(&alpha, 1, w, h, dw, dh, filter)?;
                let color_up = self.refine(color_up, dw, dh, cc);
                join_last_channel(&color_up, &alpha_up, cc)
            }
            n => {
                return Err(EnhanceError::UnsupportedChannels {
                    operator: self.name().to_string(),
                    channels: n as u8,
                })
            }
        };
        Ok(ImageBuffer::from_vec(dw, dh, tile.channels(), data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhance::validate_output;

    fn gradient(w: u32, h: u32, channels: u8) -> ImageBuffer<u8> {
        let mut img = ImageBuffer::<u8>::new(w, h, channels).unwrap();
        for y in 0..h {
            for x in 0..w {
                let v = ((x * 255) / w.max(1)) as u8;
                let px = img.pixel_mut(x, y);
                for (c, s) in px.iter_mut().enumerate() {
                    *s = v.wrapping_add((c as u8) * 20).wrapping_add((y * 3) as u8);
                }
            }
        }
        img
    }

    #[test]
    fn test_output_obeys_dimension_law() {
        let op = ClassicalEnhancer::default();
        for channels in [1u8, 3, 4] {
            let tile = gradient(19, 11, channels);
            let out = op.enhance(&tile, Scale::integer(2)).unwrap();
            validate_output(&tile, &out, Scale::integer(2)).unwrap();
        }
    }

    #[test]
    fn test_fractional_scale() {
        let op = ClassicalEnhancer::default();
        let tile = gradient(13, 9, 3);
        let scale = Scale::new(2.5).unwrap();
        let out = op.enhance(&tile, scale).unwrap();
        validate_output(&tile, &out, scale).unwrap();
    }

    #[test]
    fn test_flat_tile_stays_flat() {
        let op = ClassicalEnhancer::default();
        let tile = ImageBuffer::filled(16, 16, &[100u8, 150, 200]).unwrap();
        let out = op.enhance(&tile, Scale::integer(4)).unwrap();
        let first = out.pixel(0, 0).to_vec();
        for p in out.as_raw().chunks(3) {
            for c in 0..3 {
                assert!((p[c] as i32 - first[c] as i32).abs() <= 1, "{p:?} vs {first:?}");
            }
        }
    }

    #[test]
    fn test_alpha_is_only_resized() {
        let op = ClassicalEnhancer::default();
        let tile = ImageBuffer::filled(8, 8, &[10u8, 200, 30, 77]).unwrap();
        let out = op.enhance(&tile, Scale::integer(2)).unwrap();
        assert!(out.as_raw().chunks(4).all(|p| p[3] == 77));
    }

    #[test]
    fn test_resize_only_matches_resample() {
        let tile = gradient(10, 10, 3);
        let op = ClassicalEnhancer::new(ClassicalOptions::resize_only(ResampleFilter::Bilinear));
        let out = op.enhance(&tile, Scale::integer(2)).unwrap();
        let direct = fir_resize(tile.as_raw(), 3, 10, 10, 20, 20, ResampleFilter::Bilinear).unwrap();
        assert_eq!(out.as_raw(), direct.as_slice());
    }
}
