//! Low-light correction applied to the whole source image before tiling.
//!
//! Stages, in order: gamma lift, CLAHE on luma, linear contrast/brightness,
//! bilateral denoise, HSV saturation boost and a percentile range stretch
//! on luma. A trailing alpha channel is carried through unchanged.

use tracing::debug;

use crate::core::buffer::{join_last_channel, split_last_channel, ImageBuffer};
use crate::core::color::{luma_plane, replace_luma};
use crate::core::contrast::{clahe, ClaheParams};
use crate::core::denoise::{bilateral_filter, BilateralParams};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowLight {
    /// Exponent applied to normalized samples; below 1 lifts shadows.
    pub gamma: f32,
    pub contrast: Option<ClaheParams>,
    /// Linear gain and offset (offset in normalized units) after CLAHE.
    pub gain: f32,
    pub bias: f32,
    pub denoise: Option<BilateralParams>,
    /// HSV saturation multiplier; ignored for gray images.
    pub saturation: f32,
    /// Luma percentiles mapped to black and white, e.g. `(5.0, 95.0)`.
    pub stretch: Option<(f32, f32)>,
}

impl Default for LowLight {
    fn default() -> Self {
        Self {
            gamma: 0.6,
            contrast: Some(ClaheParams {
                clip_limit: 3.0,
                grid: 8,
            }),
            gain: 1.3,
            bias: 0.1,
            denoise: Some(BilateralParams::default()),
            saturation: 1.2,
            stretch: Some((5.0, 95.0)),
        }
    }
}

fn build_lut(f: impl Fn(f32) -> f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (v, out) in lut.iter_mut().enumerate() {
        *out = f(v as f32).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn gamma_lut(gamma: f32) -> [u8; 256] {
    build_lut(|v| 255.0 * (v / 255.0).powf(gamma))
}

fn linear_lut(gain: f32, bias: f32) -> [u8; 256] {
    build_lut(|v| gain * v + bias * 255.0)
}

/// Scale HSV saturation by `factor`, keeping hue and value.
///
/// With value `V = max(r, g, b)` every channel moves away from `V`
/// proportionally; the factor is capped where the smallest channel hits 0.
fn saturate(px: &mut [u8], factor: f32) {
    let (max, min) = px
        .iter()
        .fold((0u8, u8::MAX), |(hi, lo), &c| (hi.max(c), lo.min(c)));
    if max == min {
        return;
    }
    let v = max as f32;
    let k = factor.min(v / (v - min as f32));
    for c in px.iter_mut() {
        *c = (v - (v - *c as f32) * k).round().clamp(0.0, 255.0) as u8;
    }
}

/// Smallest values whose cumulative share reaches each percentile.
fn percentile_bounds(plane: &[u8], low: f32, high: f32) -> (u8, u8) {
    let mut hist = [0usize; 256];
    for &v in plane {
        hist[v as usize] += 1;
    }
    let n = plane.len();
    let find = |p: f32| -> u8 {
        let rank = ((p * n as f32 / 100.0).ceil() as usize).clamp(1, n.max(1));
        let mut cum = 0;
        for (v, &count) in hist.iter().enumerate() {
            cum += count;
            if cum >= rank {
                return v as u8;
            }
        }
        255
    };
    (find(low), find(high))
}

impl LowLight {
    /// Correct `image` in place. Images with 1 or 3 channels are treated as
    /// colour only; with 2 or 4 channels the last one is alpha.
    pub fn apply(&self, image: &mut ImageBuffer<u8>) {
        let (w, h) = image.dimensions();
        let channels = image.channels() as usize;
        if w == 0 || h == 0 {
            return;
        }
        let has_alpha = channels == 2 || channels == 4;
        let (mut px, alpha) = if has_alpha {
            let (color, alpha) = split_last_channel(image.as_raw(), channels);
            (color, Some(alpha))
        } else {
            (image.as_raw().to_vec(), None)
        };
        let cc = if has_alpha { channels - 1 } else { channels };

        let lut = gamma_lut(self.gamma);
        px.iter_mut().for_each(|v| *v = lut[*v as usize]);

        if let Some(params) = self.contrast {
            let luma = luma_plane(&px, cc);
            let equalized = clahe(&luma, w, h, params);
            replace_luma(&mut px, cc, &equalized);
        }

        let lut = linear_lut(self.gain, self.bias);
        px.iter_mut().for_each(|v| *v = lut[*v as usize]);

        if let Some(params) = self.denoise {
            px = bilateral_filter(&px, w, h, cc, params);
        }

        if cc >= 3 && self.saturation != 1.0 {
            for p in px.chunks_exact_mut(cc) {
                saturate(p, self.saturation);
            }
        }

        if let Some((low_p, high_p)) = self.stretch {
            let (low, high) = percentile_bounds(&luma_plane(&px, cc), low_p, high_p);
            debug!(low, high, "low-light range stretch");
            if high > low {
                let (low, span) = (low as f32, (high - low) as f32);
                let lut = build_lut(|v| (v - low) / span * 255.0);
                px.iter_mut().for_each(|v| *v = lut[*v as usize]);
            }
        }

        let out = match alpha {
            Some(alpha) => join_last_channel(&px, &alpha, cc),
            None => px,
        };
        image.as_raw_mut().copy_from_slice(&out);
    }
}
