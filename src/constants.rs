// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use crate::frame_processor::types::BarcodeFormat;
use std::collections::BTreeMap;
use std::time::Duration;

/// Fraction of the frame width a barcode is expected to cover
pub const DEFAULT_SCREEN_PROPORTION: f64 = 0.3;

/// Frame queue depth (image reader `max_images`)
pub const DEFAULT_MAX_IMAGES: usize = 2;

/// Largest frame side the QR detector processes before decimating
pub const DEFAULT_QR_MAX_DIMENSION: u32 = 1280;

/// Minimum decodable subject width in pixels per barcode format
///
/// Widths assume a module size of roughly 2px at the symbol's typical module
/// count, plus quiet zones.
pub const FORMAT_MIN_WIDTHS: [(BarcodeFormat, u32); 13] = [
    (BarcodeFormat::Aztec, 60),
    (BarcodeFormat::Codabar, 200),
    (BarcodeFormat::Code39, 250),
    (BarcodeFormat::Code93, 220),
    (BarcodeFormat::Code128, 220),
    (BarcodeFormat::DataMatrix, 50),
    (BarcodeFormat::Ean8, 120),
    (BarcodeFormat::Ean13, 190),
    (BarcodeFormat::Itf, 200),
    (BarcodeFormat::Pdf417, 140),
    (BarcodeFormat::QrCode, 60),
    (BarcodeFormat::UpcA, 190),
    (BarcodeFormat::UpcE, 110),
];

/// Default format → minimum width mapping
pub fn default_format_min_widths() -> BTreeMap<BarcodeFormat, u32> {
    FORMAT_MIN_WIDTHS.into_iter().collect()
}

/// Formats enabled when the configuration names none
pub const DEFAULT_FORMATS: [BarcodeFormat; 1] = [BarcodeFormat::QrCode];

/// V4L2 backend constants
pub mod v4l2 {
    /// mmap buffers requested for the capture stream
    pub const BUFFER_COUNT: u32 = 4;

    /// Capture formats the luma converter understands, most preferred first
    ///
    /// GREY and NV12 carry luma directly; MJPG needs a decode per frame.
    pub const FOURCC_PREFERENCE: [&[u8; 4]; 4] = [b"GREY", b"NV12", b"YUYV", b"MJPG"];

    /// Resolutions probed on devices reporting stepwise frame sizes
    pub const STEPWISE_RESOLUTIONS: [(u32, u32); 5] =
        [(320, 240), (640, 480), (1280, 720), (1920, 1080), (2560, 1440)];

    /// Capture errors in a row before the device is reported as failed
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;
}

pub use v4l2::{
    BUFFER_COUNT as V4L2_BUFFER_COUNT, FOURCC_PREFERENCE as V4L2_FOURCC_PREFERENCE,
    MAX_CONSECUTIVE_ERRORS as V4L2_MAX_CONSECUTIVE_ERRORS, STEPWISE_RESOLUTIONS as V4L2_STEPWISE_RESOLUTIONS,
};

/// Virtual camera constants
pub mod virtual_camera {
    use super::Duration;

    /// Frame interval of the virtual pump (~15 fps)
    pub const PUMP_INTERVAL: Duration = Duration::from_millis(66);

    /// Default size of virtual cameras without explicit sizes
    pub const DEFAULT_SIZES: [(u32, u32); 3] = [(640, 480), (1280, 720), (1920, 1080)];
}

/// Supported image file extensions for the file frame source
pub mod file_formats {
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif", "tiff", "tif", "pgm"];

    /// Check if a file extension is a supported image format
    pub fn is_image_extension(ext: &str) -> bool {
        IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Scheduler statistics are logged every this many frames
pub const STATS_LOG_INTERVAL: u64 = 30;
