// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion to 8-bit luma
//!
//! Barcode decoding only needs brightness, so every supported capture format
//! is reduced to a tightly packed grayscale plane. Used by the V4L2 capture
//! loop and the QR detector.

use super::types::PixelFormat;

/// Extract a tightly packed luma plane from a strided image
///
/// Returns `None` when `data` is too short for the given geometry.
pub fn luma_plane(data: &[u8], width: u32, height: u32, stride: u32, format: PixelFormat) -> Option<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let stride = stride as usize;
    let bpp = format.primary_plane_bytes_per_pixel();

    if stride < w * bpp {
        return None;
    }
    let needed = stride.checked_mul(h.saturating_sub(1))?.checked_add(w * bpp)?;
    if h > 0 && data.len() < needed {
        return None;
    }

    let mut luma = Vec::with_capacity(w * h);
    for y in 0..h {
        let row = &data[y * stride..y * stride + w * bpp];
        match format {
            PixelFormat::Gray8 | PixelFormat::NV12 | PixelFormat::I420 => luma.extend_from_slice(row),
            PixelFormat::YUYV => luma.extend(row.chunks_exact(2).map(|px| px[0])),
            PixelFormat::RGB24 => luma.extend(row.chunks_exact(3).map(|px| rgb_luma(px[0], px[1], px[2]))),
            PixelFormat::RGBA => luma.extend(row.chunks_exact(4).map(|px| rgb_luma(px[0], px[1], px[2]))),
        }
    }

    Some(luma)
}

/// Decode an MJPEG frame straight to grayscale
pub fn mjpeg_to_luma(data: &[u8]) -> Result<(u32, u32, Vec<u8>), image::ImageError> {
    let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?;
    let gray = decoded.to_luma8();
    let (width, height) = gray.dimensions();
    Ok((width, height, gray.into_raw()))
}

/// BT.601 luma in fixed point
#[inline]
fn rgb_luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}
