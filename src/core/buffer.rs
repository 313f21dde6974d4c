use std::fmt;

use crate::error::TilingError;

/// A pixel sample stored in an [`ImageBuffer`].
///
/// Blending happens in `f32`; `from_f32` rounds and clamps for integer
/// samples.
pub trait Sample: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
}

impl Sample for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, 255.0) as u8
    }
}

impl Sample for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

/// Axis-aligned rectangle in an image's pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the region lies entirely inside a `width x height` image.
    pub const fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }

    /// Intersection with another region, `None` when they do not overlap.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        (x1 > x0 && y1 > y0).then(|| Region::new(x0, y0, x1 - x0, y1 - y0))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

/// Owned, interleaved, row-major pixel grid.
///
/// Invariant: `data.len() == width * height * channels`.
#[derive(Clone, PartialEq)]
pub struct ImageBuffer<S = u8> {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<S>,
}

impl<S> fmt::Debug for ImageBuffer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

/// Split interleaved pixels into colour samples and a separate plane for
/// the last channel.
pub(crate) fn split_last_channel(px: &[u8], channels: usize) -> (Vec<u8>, Vec<u8>) {
    let mut color = Vec::with_capacity(px.len() / channels * (channels - 1));
    let mut alpha = Vec::with_capacity(px.len() / channels);
    for p in px.chunks_exact(channels) {
        color.extend_from_slice(&p[..channels - 1]);
        alpha.push(p[channels - 1]);
    }
    (color, alpha)
}

pub(crate) fn join_last_channel(color: &[u8], alpha: &[u8], color_channels: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(color.len() + alpha.len());
    for (c, &a) in color.chunks_exact(color_channels).zip(alpha) {
        out.extend_from_slice(c);
        out.push(a);
    }
    out
}

/// Allocate a zero-filled sample vector, reporting allocation failure
/// instead of aborting.
pub(crate) fn try_alloc<S: Sample>(len: usize, what: &'static str) -> Result<Vec<S>, TilingError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| TilingError::AllocationFailed {
            what,
            bytes: len.saturating_mul(std::mem::size_of::<S>()),
            tile: None,
        })?;
    data.resize(len, S::default());
    Ok(data)
}

fn checked_len(width: u32, height: u32, channels: u8) -> Result<usize, TilingError> {
    if width == 0 || height == 0 {
        return Err(TilingError::invalid(format!(
            "image dimensions must be non-zero, got {width}x{height}"
        )));
    }
    if !(1..=4).contains(&channels) {
        return Err(TilingError::invalid(format!(
            "channel count must be 1..=4, got {channels}"
        )));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(channels as usize))
        .ok_or_else(|| {
            TilingError::invalid(format!("{width}x{height}x{channels} overflows usize"))
        })
}

impl<S: Sample> ImageBuffer<S> {
    /// Zero-filled image.
    pub fn new(width: u32, height: u32, channels: u8) -> Result<Self, TilingError> {
        let len = checked_len(width, height, channels)?;
        Ok(Self {
            width,
            height,
            channels,
            data: try_alloc(len, "image buffer")?,
        })
    }

    pub fn from_vec(width: u32, height: u32, channels: u8, data: Vec<S>) -> Result<Self, TilingError> {
        let len = checked_len(width, height, channels)?;
        if data.len() != len {
            return Err(TilingError::invalid(format!(
                "buffer holds {} samples, {width}x{height}x{channels} needs {len}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Image where every pixel equals `pixel`.
    pub fn filled(width: u32, height: u32, pixel: &[S]) -> Result<Self, TilingError> {
        let channels = u8::try_from(pixel.len())
            .map_err(|_| TilingError::invalid("pixel has too many channels"))?;
        let mut img = Self::new(width, height, channels)?;
        for px in img.data.chunks_exact_mut(pixel.len()) {
            px.copy_from_slice(pixel);
        }
        Ok(img)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_raw(&self) -> &[S] {
        &self.data
    }

    pub fn as_raw_mut(&mut self) -> &mut [S] {
        &mut self.data
    }

    /// Samples per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels as usize
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[S] {
        let off = self.offset(x, y);
        &self.data[off..off + self.channels as usize]
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [S] {
        let off = self.offset(x, y);
        let c = self.channels as usize;
        &mut self.data[off..off + c]
    }

    pub fn row(&self, y: u32) -> &[S] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /// Copy `region` out into a new, independently owned buffer.
    pub fn extract(&self, region: Region) -> Result<ImageBuffer<S>, TilingError> {
        if region.is_empty() || !region.fits_within(self.width, self.height) {
            return Err(TilingError::invalid(format!(
                "region {region} is outside {}x{} image",
                self.width, self.height
            )));
        }
        let c = self.channels as usize;
        let row_len = region.width as usize * c;
        let mut data = try_alloc::<S>(row_len * region.height as usize, "tile buffer")?;
        for (dst_row, y) in data.chunks_exact_mut(row_len).zip(region.y..region.bottom()) {
            let src_off = self.offset(region.x, y);
            dst_row.copy_from_slice(&self.data[src_off..src_off + row_len]);
        }
        ImageBuffer::from_vec(region.width, region.height, self.channels, data)
    }

    /// Overwrite the pixels at `(x, y)` with the whole of `src`.
    pub fn write_region(&mut self, x: u32, y: u32, src: &ImageBuffer<S>) -> Result<(), TilingError> {
        let target = Region::new(x, y, src.width, src.height);
        if src.channels != self.channels {
            return Err(TilingError::invalid(format!(
                "cannot write {}-channel buffer into {}-channel image",
                src.channels, self.channels
            )));
        }
        if !target.fits_within(self.width, self.height) {
            return Err(TilingError::invalid(format!(
                "region {target} is outside {}x{} image",
                self.width, self.height
            )));
        }
        let row_len = src.stride();
        for (row, src_row) in src.data.chunks_exact(row_len).enumerate() {
            let dst_off = self.offset(x, y + row as u32);
            self.data[dst_off..dst_off + row_len].copy_from_slice(src_row);
        }
        Ok(())
    }

    /// Convert every sample to another sample type.
    pub fn map_samples<T: Sample>(&self) -> ImageBuffer<T> {
        ImageBuffer {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: self.data.iter().map(|&s| T::from_f32(s.to_f32())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32, channels: u8) -> ImageBuffer<u8> {
        let len = (width * height * channels as u32) as usize;
        ImageBuffer::from_vec(width, height, channels, (0..len).map(|i| i as u8).collect()).unwrap()
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let err = ImageBuffer::<u8>::from_vec(4, 4, 3, vec![0; 10]).unwrap_err();
        assert!(matches!(err, TilingError::InvalidDimension { .. }));
    }

    #[test]
    fn test_new_rejects_zero_and_bad_channels() {
        assert!(ImageBuffer::<u8>::new(0, 4, 3).is_err());
        assert!(ImageBuffer::<u8>::new(4, 4, 0).is_err());
        assert!(ImageBuffer::<u8>::new(4, 4, 5).is_err());
        assert!(ImageBuffer::<f32>::new(4, 4, 4).is_ok());
    }

    #[test]
    fn test_extract_region() {
        // 4x4 single-channel plane with values 0..16
        let img = ramp(4, 4, 1);
        let tile = img.extract(Region::new(1, 1, 2, 2)).unwrap();
        assert_eq!(tile.dimensions(), (2, 2));
        assert_eq!(tile.as_raw(), &[5, 6, 9, 10]);
    }

    #[test]
    fn test_extract_rejects_out_of_bounds() {
        let img = ramp(4, 4, 3);
        assert!(img.extract(Region::new(3, 3, 2, 2)).is_err());
        assert!(img.extract(Region::new(0, 0, 0, 2)).is_err());
    }

    #[test]
    fn test_write_region_places_tile() {
        let mut mosaic = ImageBuffer::<u8>::new(4, 4, 3).unwrap();
        let tile = ImageBuffer::filled(2, 2, &[255, 0, 0]).unwrap();
        mosaic.write_region(2, 0, &tile).unwrap();

        assert_eq!(mosaic.pixel(0, 0), &[0, 0, 0]);
        assert_eq!(mosaic.pixel(2, 0), &[255, 0, 0]);
        assert_eq!(mosaic.pixel(3, 1), &[255, 0, 0]);
        assert_eq!(mosaic.pixel(3, 2), &[0, 0, 0]);
    }

    #[test]
    fn test_extract_then_write_restores_image() {
        let img = ramp(6, 5, 3);
        let mut copy = ImageBuffer::<u8>::new(6, 5, 3).unwrap();
        for (x, y, w, h) in [(0, 0, 3, 5), (3, 0, 3, 2), (3, 2, 3, 3)] {
            let tile = img.extract(Region::new(x, y, w, h)).unwrap();
            copy.write_region(x, y, &tile).unwrap();
        }
        assert_eq!(copy, img);
    }

    #[test]
    fn test_write_region_rejects_channel_mismatch() {
        let mut img = ImageBuffer::<u8>::new(4, 4, 4).unwrap();
        let tile = ImageBuffer::<u8>::new(2, 2, 3).unwrap();
        assert!(img.write_region(0, 0, &tile).is_err());
    }

    #[test]
    fn test_u8_sample_rounds_and_clamps() {
        assert_eq!(u8::from_f32(127.5), 128);
        assert_eq!(u8::from_f32(-3.0), 0);
        assert_eq!(u8::from_f32(300.0), 255);
    }

    #[test]
    fn test_region_intersect() {
        let a = Region::new(0, 0, 10, 10);
        let b = Region::new(8, 4, 10, 10);
        assert_eq!(a.intersect(&b), Some(Region::new(8, 4, 2, 6)));
        assert_eq!(a.intersect(&Region::new(10, 0, 4, 4)), None);
    }
}
