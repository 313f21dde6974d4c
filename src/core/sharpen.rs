//! Unsharp masking for interleaved u8 buffers of 1 to 4 channels.
//!
//! `unsharp_mask_3x3` blurs with the binomial kernel 1-2-1 in both axes
//! using integer math; `unsharp_mask_gaussian` blurs with a Gaussian of any
//! sigma in f32. Both compute src + strength * (src - blur).
use image::Luma;
use imageproc::filter::gaussian_blur_f32;
use rayon::prelude::*;

type Plane = image::ImageBuffer<Luma<f32>, Vec<f32>>;

/// Apply the 3×3 unsharp mask. `strength` is typically 0.5–2.0.
pub fn unsharp_mask_3x3(src: &[u8], w: u32, h: u32, channels: usize, strength: f32) -> Vec<u8> {
    let w = w as usize;
    let h = h as usize;
    let stride = w * channels;
    let len = h * stride;
    debug_assert_eq!(src.len(), len);

    // horizontal sums fit in u16: at most 4 * 255
    let mut hblur = vec![0u16; len];
    hblur
        .par_chunks_mut(stride)
        .zip(src.par_chunks(stride))
        .for_each(|(hrow, row)| {
            for x in 0..w {
                let x0 = x.saturating_sub(1);
                let x2 = if x + 1 < w { x + 1 } else { w - 1 };
                for c in 0..channels {
                    let a = row[x0 * channels + c] as u16;
                    let b = row[x * channels + c] as u16;
                    let d = row[x2 * channels + c] as u16;
                    hrow[x * channels + c] = a + 2 * b + d;
                }
            }
        });

    // vertical sums are the blur times 16; strength carries 8 fraction bits
    let strength_i = (strength * 256.0).round() as i32;
    let mut out = vec![0u8; len];
    out.par_chunks_mut(stride).enumerate().for_each(|(y, out_row)| {
        let y0 = y.saturating_sub(1);
        let y2 = if y + 1 < h { y + 1 } else { h - 1 };
        let row0 = y0 * stride;
        let row1 = y * stride;
        let row2 = y2 * stride;
        for i in 0..stride {
            let blur16 = hblur[row0 + i] as i32 + 2 * hblur[row1 + i] as i32 + hblur[row2 + i] as i32;
            let s16 = (src[row1 + i] as i32) << 4;
            let diff = s16 - blur16;
            let v = (s16 * 256 + strength_i * diff + 2048) >> 12;
            out_row[i] = v.clamp(0, 255) as u8;
        }
    });

    out
}

/// Unsharp mask against a Gaussian blur of each channel plane:
/// out = (1 + amount) × src − amount × blurred. A non-positive sigma leaves
/// the pixels unchanged.
pub fn unsharp_mask_gaussian(src: &[u8], w: u32, h: u32, channels: usize, sigma: f32, amount: f32) -> Vec<u8> {
    let mut out = src.to_vec();
    if sigma <= 0.0 || w == 0 || h == 0 {
        return out;
    }
    let stride = w as usize * channels;
    for c in 0..channels {
        let plane = Plane::from_fn(w, h, |x, y| {
            Luma([src[y as usize * stride + x as usize * channels + c] as f32])
        });
        let blurred = gaussian_blur_f32(&plane, sigma);
        for (o, b) in out.iter_mut().skip(c).step_by(channels).zip(blurred.pixels()) {
            let v = (1.0 + amount) * *o as f32 - amount * b[0];
            *o = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
