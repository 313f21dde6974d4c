//! Contrast-limited adaptive histogram equalization on a single u8 plane.
//!
//! The plane is split into a grid of contextual regions; each region gets a
//! clipped, equalized lookup table and every pixel interpolates bilinearly
//! between the tables of the four nearest region centres.

use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClaheParams {
    /// Histogram clip limit relative to a uniform histogram.
    pub clip_limit: f32,
    /// Regions per axis, reduced for planes smaller than the grid.
    pub grid: u32,
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            grid: 8,
        }
    }
}

/// Equalized LUT for one region.
fn region_lut(plane: &[u8], stride: usize, x0: usize, x1: usize, y0: usize, y1: usize, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0f32; 256];
    for y in y0..y1 {
        for &v in &plane[y * stride + x0..y * stride + x1] {
            hist[v as usize] += 1.0;
        }
    }
    let area = ((x1 - x0) * (y1 - y0)) as f32;

    if clip_limit > 0.0 {
        let limit = (clip_limit * area / 256.0).max(1.0);
        let mut excess = 0f32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let share = excess / 256.0;
        for bin in hist.iter_mut() {
            *bin += share;
        }
    }

    let mut lut = [0u8; 256];
    let scale = 255.0 / area;
    let mut cdf = 0f32;
    for (v, &count) in hist.iter().enumerate() {
        cdf += count;
        lut[v] = (cdf * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Region index below `pos` and the interpolation weight towards the next one.
#[inline]
fn locate(pos: usize, region: f32, regions: usize) -> (usize, usize, f32) {
    let f = (pos as f32 + 0.5) / region - 0.5;
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    let i0 = (f.floor() as usize).min(regions - 1);
    let i1 = (i0 + 1).min(regions - 1);
    (i0, i1, (f - i0 as f32).clamp(0.0, 1.0))
}

pub fn clahe(plane: &[u8], w: u32, h: u32, params: ClaheParams) -> Vec<u8> {
    let w = w as usize;
    let h = h as usize;
    debug_assert_eq!(plane.len(), w * h);
    if plane.is_empty() {
        return Vec::new();
    }
    let gx = (params.grid.max(1) as usize).min(w);
    let gy = (params.grid.max(1) as usize).min(h);

    let luts: Vec<[u8; 256]> = (0..gx * gy)
        .into_par_iter()
        .map(|i| {
            let (ry, rx) = (i / gx, i % gx);
            region_lut(
                plane,
                w,
                rx * w / gx,
                (rx + 1) * w / gx,
                ry * h / gy,
                (ry + 1) * h / gy,
                params.clip_limit,
            )
        })
        .collect();

    let region_w = w as f32 / gx as f32;
    let region_h = h as f32 / gy as f32;
    let mut out = vec![0u8; plane.len()];
    out.par_chunks_mut(w).enumerate().for_each(|(y, out_row)| {
        let (ty0, ty1, wy) = locate(y, region_h, gy);
        for (x, dst) in out_row.iter_mut().enumerate() {
            let (tx0, tx1, wx) = locate(x, region_w, gx);
            let v = plane[y * w + x] as usize;
            let a = luts[ty0 * gx + tx0][v] as f32;
            let b = luts[ty0 * gx + tx1][v] as f32;
            let c = luts[ty1 * gx + tx0][v] as f32;
            let d = luts[ty1 * gx + tx1][v] as f32;
            let top = a + (b - a) * wx;
            let bottom = c + (d - c) * wx;
            *dst = (top + (bottom - top) * wy).round().clamp(0.0, 255.0) as u8;
        }
    });
    out
}
