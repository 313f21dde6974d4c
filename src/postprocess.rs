//! Whole-image passes applied after assembly.

use image::GrayImage;
use imageproc::edges::canny;

use crate::core::buffer::ImageBuffer;
use crate::core::color::luma_plane;
use crate::error::TilingError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeBoost {
    pub low_threshold: f32,
    pub high_threshold: f32,
    /// Weight of the edge map in the blend; the image keeps `1 - weight`.
    pub weight: f32,
}

impl Default for EdgeBoost {
    fn default() -> Self {
        Self {
            low_threshold: 50.0,
            high_threshold: 150.0,
            weight: 0.05,
        }
    }
}

impl EdgeBoost {
    /// Blend a Canny edge map of the luma into every colour channel.
    /// A fourth (alpha) channel is left untouched.
    pub fn apply(&self, image: &mut ImageBuffer<u8>) -> Result<(), TilingError> {
        let (w, h) = image.dimensions();
        let channels = image.channels() as usize;
        let luma = GrayImage::from_raw(w, h, luma_plane(image.as_raw(), channels))
            .ok_or_else(|| TilingError::invalid("luma plane does not match image size"))?;
        let edges = canny(&luma, self.low_threshold, self.high_threshold);

        let color_channels = if channels == 4 || channels == 2 { channels - 1 } else { channels };
        let keep = 1.0 - self.weight;
        for (px, edge) in image.as_raw_mut().chunks_exact_mut(channels).zip(edges.as_raw()) {
            let e = *edge as f32 * self.weight;
            for s in &mut px[..color_channels] {
                *s = (*s as f32 * keep + e).round().clamp(0.0, 255.0) as u8;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_image_only_dims() {
        let mut img = ImageBuffer::filled(20, 20, &[200u8, 100, 0]).unwrap();
        EdgeBoost::default().apply(&mut img).unwrap();
        // no edges: every sample scaled by 0.95
        assert!(img.as_raw().chunks(3).all(|p| p == [190, 95, 0]));
    }

    #[test]
    fn test_edges_brighten() {
        let mut img = ImageBuffer::<u8>::new(32, 32, 1).unwrap();
        for y in 0..32 {
            for x in 16..32 {
                img.pixel_mut(x, y)[0] = 220;
            }
        }
        let before = img.clone();
        EdgeBoost::default().apply(&mut img).unwrap();
        let brightened = (0..32)
            .flat_map(|y| (0..32).map(move |x| (x, y)))
            .filter(|&(x, y)| img.pixel(x, y)[0] > before.pixel(x, y)[0])
            .count();
        assert!(brightened > 0);
    }

    #[test]
    fn test_alpha_untouched() {
        let mut img = ImageBuffer::filled(8, 8, &[10u8, 20, 30, 128]).unwrap();
        EdgeBoost::default().apply(&mut img).unwrap();
        assert!(img.as_raw().chunks(4).all(|p| p[3] == 128));
    }
}
