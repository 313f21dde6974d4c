//! Conversion between `image` crate types and [`ImageBuffer`], plus file I/O.

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};

use crate::core::buffer::ImageBuffer;
use crate::error::TilingError;

/// Channel count used when loading `img`: 4 with alpha, 1 for gray, else 3.
pub fn natural_channels(img: &DynamicImage) -> u8 {
    let color = img.color();
    match (color.has_alpha(), color.has_color()) {
        (true, _) => 4,
        (false, false) => 1,
        (false, true) => 3,
    }
}

pub fn from_dynamic(img: DynamicImage) -> Result<ImageBuffer<u8>, TilingError> {
    let channels = natural_channels(&img);
    with_channels(img, channels)
}

/// Convert to an 8-bit buffer with exactly `channels` channels.
pub fn with_channels(img: DynamicImage, channels: u8) -> Result<ImageBuffer<u8>, TilingError> {
    let (w, h) = (img.width(), img.height());
    let data = match channels {
        1 => img.into_luma8().into_raw(),
        2 => img.into_luma_alpha8().into_raw(),
        3 => img.into_rgb8().into_raw(),
        4 => img.into_rgba8().into_raw(),
        n => return Err(TilingError::invalid(format!("cannot convert image to {n} channels"))),
    };
    ImageBuffer::from_vec(w, h, channels, data)
}

pub fn to_dynamic(buf: &ImageBuffer<u8>) -> Result<DynamicImage, TilingError> {
    let (w, h) = buf.dimensions();
    let data = buf.as_raw().to_vec();
    let img = match buf.channels() {
        1 => image::GrayImage::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
        2 => image::GrayAlphaImage::from_raw(w, h, data).map(DynamicImage::ImageLumaA8),
        3 => image::RgbImage::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
        4 => image::RgbaImage::from_raw(w, h, data).map(DynamicImage::ImageRgba8),
        _ => None,
    };
    img.ok_or_else(|| TilingError::invalid(format!("{w}x{h}x{} buffer is not a valid image", buf.channels())))
}

pub fn load_image(path: &Path) -> Result<ImageBuffer<u8>> {
    let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(from_dynamic(img)?)
}

/// Save with the format implied by the extension of `path`.
pub fn save_image(buf: &ImageBuffer<u8>, path: &Path) -> Result<()> {
    let format = ImageFormat::from_path(path)
        .with_context(|| format!("cannot infer image format from {}", path.display()))?;
    save_image_as(buf, path, format)
}

pub fn save_image_as(buf: &ImageBuffer<u8>, path: &Path, format: ImageFormat) -> Result<()> {
    let mut img = to_dynamic(buf)?;
    // JPEG has no alpha channel
    if format == ImageFormat::Jpeg && img.color().has_alpha() {
        img = DynamicImage::ImageRgb8(img.into_rgb8());
    }
    img.save_with_format(path, format)
        .with_context(|| format!("failed to write {}", path.display()))
}

pub fn encode_png(buf: &ImageBuffer<u8>) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    to_dynamic(buf)?.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
