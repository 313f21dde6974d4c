pub mod blend;
pub mod buffer;
pub mod color;
pub mod contrast;
pub mod denoise;
pub mod plan;
pub mod scale;
pub mod sharpen;

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Resampling filter for up/downscale operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleFilter {
    Bilinear,
    Bicubic,
    #[default]
    Lanczos3,
}

impl ResampleFilter {
    fn to_fir(self) -> fast_image_resize::ResizeAlg {
        use fast_image_resize as fir;
        match self {
            ResampleFilter::Bilinear => fir::ResizeAlg::Convolution(fir::FilterType::Bilinear),
            ResampleFilter::Bicubic => fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom),
            ResampleFilter::Lanczos3 => fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3),
        }
    }
}

impl fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResampleFilter::Bilinear => write!(f, "bilinear"),
            ResampleFilter::Bicubic => write!(f, "bicubic"),
            ResampleFilter::Lanczos3 => write!(f, "lanczos3"),
        }
    }
}

impl FromStr for ResampleFilter {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bilinear" | "triangle" => Ok(ResampleFilter::Bilinear),
            "bicubic" | "catmullrom" | "catmull-rom" => Ok(ResampleFilter::Bicubic),
            "lanczos3" | "lanczos" => Ok(ResampleFilter::Lanczos3),
            _ => Err(format!("unknown resample filter '{}'. Available: bilinear, bicubic, lanczos3", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// SIMD-accelerated resize helpers (via fast_image_resize)
// ---------------------------------------------------------------------------

/// Resize an interleaved u8 buffer with 1 to 4 channels.
///
/// Channels are resized independently; a fourth channel is not treated as
/// premultiplying alpha.
pub fn fir_resize(
    pixels: &[u8],
    channels: usize,
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
    filter: ResampleFilter,
) -> Result<Vec<u8>> {
    use fast_image_resize as fir;
    let pixel_type = match channels {
        1 => fir::pixels::PixelType::U8,
        2 => fir::pixels::PixelType::U8x2,
        3 => fir::pixels::PixelType::U8x3,
        4 => fir::pixels::PixelType::U8x4,
        n => bail!("cannot resize {n}-channel pixels"),
    };
    let src = fir::images::Image::from_vec_u8(src_w, src_h, pixels.to_vec(), pixel_type)?;
    let mut dst = fir::images::Image::new(dst_w, dst_h, pixel_type);
    let options = fir::ResizeOptions::new().resize_alg(filter.to_fir()).use_alpha(false);
    let mut resizer = fir::Resizer::new();
    resizer.resize(&src, &mut dst, &options)?;
    Ok(dst.into_vec())
}
