//! Edge-preserving bilateral filter over interleaved u8 pixels.
//!
//! Each output pixel is a weighted mean of its neighbours inside a disc of
//! `radius`, weighted by spatial distance and by the L1 colour distance
//! summed over all channels.

use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilateralParams {
    /// Neighbourhood radius in pixels (a diameter of 9 is radius 4).
    pub radius: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
}

impl Default for BilateralParams {
    fn default() -> Self {
        Self {
            radius: 4,
            sigma_color: 75.0,
            sigma_space: 75.0,
        }
    }
}

pub fn bilateral_filter(src: &[u8], w: u32, h: u32, channels: usize, params: BilateralParams) -> Vec<u8> {
    let w = w as usize;
    let h = h as usize;
    let stride = w * channels;
    debug_assert_eq!(src.len(), h * stride);
    if params.radius == 0 || src.is_empty() {
        return src.to_vec();
    }

    let r = params.radius as isize;
    let space_coeff = -0.5 / (params.sigma_space * params.sigma_space);
    let color_coeff = -0.5 / (params.sigma_color * params.sigma_color);

    // disc offsets with their spatial weights
    let mut taps: Vec<(isize, isize, f32)> = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            let d2 = (dx * dx + dy * dy) as f32;
            if d2.sqrt() <= r as f32 {
                taps.push((dx, dy, (d2 * space_coeff).exp()));
            }
        }
    }

    // colour weight indexed by summed absolute difference
    let color_lut: Vec<f32> = (0..=255 * channels)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    let mut out = vec![0u8; src.len()];
    out.par_chunks_mut(stride).enumerate().for_each(|(y, out_row)| {
        let mut acc = [0f32; 4];
        for x in 0..w {
            let center = &src[y * stride + x * channels..][..channels];
            acc[..channels].fill(0.0);
            let mut weight_sum = 0f32;
            for &(dx, dy, ws) in &taps {
                let sx = (x as isize + dx).clamp(0, w as isize - 1) as usize;
                let sy = (y as isize + dy).clamp(0, h as isize - 1) as usize;
                let px = &src[sy * stride + sx * channels..][..channels];
                let diff: usize = px
                    .iter()
                    .zip(center)
                    .map(|(&a, &b)| (a as i32 - b as i32).unsigned_abs() as usize)
                    .sum();
                let wgt = ws * color_lut[diff];
                weight_sum += wgt;
                for c in 0..channels {
                    acc[c] += wgt * px[c] as f32;
                }
            }
            let dst = &mut out_row[x * channels..(x + 1) * channels];
            for c in 0..channels {
                dst[c] = (acc[c] / weight_sum).round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    out
}
