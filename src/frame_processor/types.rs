// SPDX-License-Identifier: MPL-2.0

//! Core types for frame processing results
//!
//! These types describe what travels with a frame into a detector and what
//! comes back out of it.

use crate::backends::camera::types::{CameraFacing, SensorRotation};
use serde::{Deserialize, Serialize};

/// Symbologies a detector may be asked to look for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeFormat {
    Aztec,
    Codabar,
    Code39,
    Code93,
    Code128,
    DataMatrix,
    Ean8,
    Ean13,
    Itf,
    Pdf417,
    QrCode,
    UpcA,
    UpcE,
}

impl BarcodeFormat {
    pub const ALL: [BarcodeFormat; 13] = [
        BarcodeFormat::Aztec,
        BarcodeFormat::Codabar,
        BarcodeFormat::Code39,
        BarcodeFormat::Code93,
        BarcodeFormat::Code128,
        BarcodeFormat::DataMatrix,
        BarcodeFormat::Ean8,
        BarcodeFormat::Ean13,
        BarcodeFormat::Itf,
        BarcodeFormat::Pdf417,
        BarcodeFormat::QrCode,
        BarcodeFormat::UpcA,
        BarcodeFormat::UpcE,
    ];

    /// Get display name for the format
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Aztec => "Aztec",
            Self::Codabar => "Codabar",
            Self::Code39 => "Code 39",
            Self::Code93 => "Code 93",
            Self::Code128 => "Code 128",
            Self::DataMatrix => "Data Matrix",
            Self::Ean8 => "EAN-8",
            Self::Ean13 => "EAN-13",
            Self::Itf => "ITF",
            Self::Pdf417 => "PDF417",
            Self::QrCode => "QR Code",
            Self::UpcA => "UPC-A",
            Self::UpcE => "UPC-E",
        }
    }
}

impl std::fmt::Display for BarcodeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Metadata computed by the scheduler for every admitted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation that makes the frame upright
    pub rotation: SensorRotation,
    /// Facing of the camera that produced the frame
    pub facing: CameraFacing,
}

/// A rectangular region within a frame
///
/// Coordinates are normalized (0.0 to 1.0) relative to the frame dimensions.
/// This allows easy transformation to screen coordinates regardless of
/// the actual frame size or display scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRegion {
    /// Left edge (0.0 = left of frame, 1.0 = right of frame)
    pub x: f32,
    /// Top edge (0.0 = top of frame, 1.0 = bottom of frame)
    pub y: f32,
    /// Width as fraction of frame width
    pub width: f32,
    /// Height as fraction of frame height
    pub height: f32,
}

impl FrameRegion {
    /// Create a frame region from pixel coordinates
    pub fn from_pixels(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        Self {
            x: x as f32 / frame_width as f32,
            y: y as f32 / frame_height as f32,
            width: width as f32 / frame_width as f32,
            height: height as f32 / frame_height as f32,
        }
    }

    /// Map the region into the frame rotated clockwise by `rotation`
    pub fn rotated(&self, rotation: SensorRotation) -> Self {
        match rotation {
            SensorRotation::None => *self,
            SensorRotation::Rotate90 => Self {
                x: 1.0 - self.y - self.height,
                y: self.x,
                width: self.height,
                height: self.width,
            },
            SensorRotation::Rotate180 => Self {
                x: 1.0 - self.x - self.width,
                y: 1.0 - self.y - self.height,
                width: self.width,
                height: self.height,
            },
            SensorRotation::Rotate270 => Self {
                x: self.y,
                y: 1.0 - self.x - self.width,
                width: self.height,
                height: self.width,
            },
        }
    }
}

/// A single decoded barcode
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub format: BarcodeFormat,
    /// Raw decoded content
    pub content: String,
    /// Bounding box in upright, normalized frame coordinates
    pub bounds: FrameRegion,
}

/// Everything one frame produced, delivered to result listeners
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Sequence number of the frame within its frame queue
    pub sequence: u64,
    pub metadata: FrameMetadata,
    pub detections: Vec<Detection>,
}
