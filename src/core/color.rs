//! BT.601 colour conversion and luma plane helpers.

/// RGB to full-range YCbCr, unquantized.
#[inline]
pub fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = -0.168736 * r - 0.331264 * g + 0.5 * b + 128.0;
    let cr = 0.5 * r - 0.418688 * g - 0.081312 * b + 128.0;

    (y, cb, cr)
}

/// Convert YCbCr to RGB using float BT.601
#[inline]
pub fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> (u8, u8, u8) {
    let cb = cb - 128.0;
    let cr = cr - 128.0;

    let r = (y + 1.402 * cr).round().clamp(0.0, 255.0) as u8;
    let g = (y - 0.344136 * cb - 0.714136 * cr).round().clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * cb).round().clamp(0.0, 255.0) as u8;

    (r, g, b)
}

/// Luma of every pixel of an interleaved buffer, quantized to u8.
///
/// Only the first three channels are read; a fourth (alpha) is ignored.
/// Single-channel input is returned as is.
pub fn luma_plane(pixels: &[u8], channels: usize) -> Vec<u8> {
    if channels < 3 {
        return pixels.iter().step_by(channels).copied().collect();
    }
    pixels
        .chunks_exact(channels)
        .map(|p| {
            let (y, _, _) = rgb_to_ycbcr(p[0], p[1], p[2]);
            y.round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Replace the luma of every pixel, keeping its chroma (and alpha).
///
/// Pixels whose quantized luma did not change are left bit-exact.
pub fn replace_luma(pixels: &mut [u8], channels: usize, new_luma: &[u8]) {
    if channels < 3 {
        for (p, &y) in pixels.chunks_exact_mut(channels).zip(new_luma) {
            p[0] = y;
        }
        return;
    }
    for (p, &y_new) in pixels.chunks_exact_mut(channels).zip(new_luma) {
        let (y, cb, cr) = rgb_to_ycbcr(p[0], p[1], p[2]);
        if y.round() as u8 == y_new {
            continue;
        }
        // shift by the quantized delta so chroma is preserved
        let shifted = y + (y_new as f32 - y.round());
        let (r, g, b) = ycbcr_to_rgb(shifted, cb, cr);
        p[0] = r;
        p[1] = g;
        p[2] = b;
    }
}
