//! Interpolation-only operators.

use rayon::prelude::*;

use crate::core::buffer::{ImageBuffer, Sample};
use crate::core::scale::Scale;
use crate::core::{fir_resize, ResampleFilter};
use crate::enhance::{expected_size, EnhanceOperator};
use crate::error::EnhanceError;

/// Plain resize with a convolution filter.
#[derive(Debug, Clone)]
pub struct ResampleOperator {
    filter: ResampleFilter,
    name: String,
}

impl ResampleOperator {
    pub fn new(filter: ResampleFilter) -> Self {
        Self {
            filter,
            name: format!("resample:{filter}"),
        }
    }

    pub fn filter(&self) -> ResampleFilter {
        self.filter
    }
}

impl Default for ResampleOperator {
    fn default() -> Self {
        Self::new(ResampleFilter::default())
    }
}

impl EnhanceOperator<u8> for ResampleOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn enhance(&self, tile: &ImageBuffer<u8>, scale: Scale) -> Result<ImageBuffer<u8>, EnhanceError> {
        let (w, h) = tile.dimensions();
        let (dw, dh) = expected_size(w, h, scale);
        let data = fir_resize(tile.as_raw(), tile.channels() as usize, w, h, dw, dh, self.filter)?;
        Ok(ImageBuffer::from_vec(dw, dh, tile.channels(), data)?)
    }
}

/// Pixel replication. Works for any sample type and any scale.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestOperator;

/// Nearest-neighbour resize of an interleaved buffer, row-parallel.
pub fn nearest_resize<S: Sample>(src: &ImageBuffer<S>, dst_w: u32, dst_h: u32) -> Result<ImageBuffer<S>, EnhanceError> {
    let (src_w, src_h) = src.dimensions();
    let c = src.channels() as usize;
    let mut dst = ImageBuffer::<S>::new(dst_w, dst_h, src.channels())?;
    let stride = dst.stride();

    // source column for every destination column, sampled at pixel centres
    let xs: Vec<usize> = (0..dst_w)
        .map(|x| ((((x as f64 + 0.5) * src_w as f64 / dst_w as f64) as u32).min(src_w - 1)) as usize)
        .collect();

    dst.as_raw_mut()
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(dst_y, dst_row)| {
            let src_y = (((dst_y as f64 + 0.5) * src_h as f64 / dst_h as f64) as u32).min(src_h - 1);
            let src_row = src.row(src_y);
            for (dst_px, &sx) in dst_row.chunks_exact_mut(c).zip(&xs) {
                dst_px.copy_from_slice(&src_row[sx * c..(sx + 1) * c]);
            }
        });
    Ok(dst)
}

impl<S: Sample> EnhanceOperator<S> for NearestOperator {
    fn name(&self) -> &str {
        "nearest"
    }

    fn enhance(&self, tile: &ImageBuffer<S>, scale: Scale) -> Result<ImageBuffer<S>, EnhanceError> {
        let (dw, dh) = expected_size(tile.width(), tile.height(), scale);
        nearest_resize(tile, dw, dh)
    }
}
