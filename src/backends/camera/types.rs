// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Camera backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CameraBackendType {
    /// Video4Linux2 capture nodes (/dev/video*)
    #[default]
    V4l2,
    /// Scripted in-process cameras (image files, tests)
    Virtual,
}

impl std::fmt::Display for CameraBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackendType::V4l2 => write!(f, "V4L2"),
            CameraBackendType::Virtual => write!(f, "virtual"),
        }
    }
}

/// Camera mounting direction relative to the device body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Front,
    #[default]
    Back,
    External,
    Unknown,
}

impl std::fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraFacing::Front => write!(f, "front"),
            CameraFacing::Back => write!(f, "back"),
            CameraFacing::External => write!(f, "external"),
            CameraFacing::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for CameraFacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(CameraFacing::Front),
            "back" | "rear" => Ok(CameraFacing::Back),
            "external" => Ok(CameraFacing::External),
            other => Err(format!("unknown camera facing '{}'", other)),
        }
    }
}

/// Sensor rotation in degrees (clockwise)
///
/// Camera sensors may be physically mounted at various angles relative to the device.
/// This is common on mobile devices where sensors are rotated 90° or 270° relative
/// to the display orientation. The same quarter-turn type is used for the
/// rotation compensation attached to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    ///
    /// Values that are not a quarter turn snap to `None`.
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, SensorRotation::Rotate90 | SensorRotation::Rotate270)
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Current device rotation relative to its natural orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl DeviceRotation {
    pub const ALL: [DeviceRotation; 4] = [
        DeviceRotation::Rotation0,
        DeviceRotation::Rotation90,
        DeviceRotation::Rotation180,
        DeviceRotation::Rotation270,
    ];

    pub fn degrees(&self) -> u32 {
        match self {
            DeviceRotation::Rotation0 => 0,
            DeviceRotation::Rotation90 => 90,
            DeviceRotation::Rotation180 => 180,
            DeviceRotation::Rotation270 => 270,
        }
    }

    /// Snap an arbitrary angle to the nearest lower quarter turn
    pub fn from_degrees(degrees: u32) -> Self {
        match (degrees % 360) / 90 {
            1 => DeviceRotation::Rotation90,
            2 => DeviceRotation::Rotation180,
            3 => DeviceRotation::Rotation270,
            _ => DeviceRotation::Rotation0,
        }
    }
}

impl std::str::FromStr for DeviceRotation {
    type Err = String;

    /// Accepts exactly 0, 90, 180 or 270
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let degrees: u32 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid rotation '{}'", s.trim()))?;
        DeviceRotation::ALL
            .into_iter()
            .find(|rotation| rotation.degrees() == degrees)
            .ok_or_else(|| format!("rotation must be 0, 90, 180 or 270, got {}", degrees))
    }
}

/// Output resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl OutputSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for OutputSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Autofocus modes, in descending order of preference for scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutoFocusMode {
    /// Focus continuously tracks the scene
    ContinuousPicture,
    /// Single-shot autofocus sweep
    Auto,
    /// Fixed focus; always available
    Off,
}

impl std::fmt::Display for AutoFocusMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutoFocusMode::ContinuousPicture => write!(f, "continuous-picture"),
            AutoFocusMode::Auto => write!(f, "auto"),
            AutoFocusMode::Off => write!(f, "off"),
        }
    }
}

/// Static characteristics of one camera, as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraCharacteristics {
    /// Opaque platform id
    pub id: String,
    pub facing: CameraFacing,
    pub sensor_orientation: SensorRotation,
    /// Discrete output sizes the device can stream
    pub output_sizes: Vec<OutputSize>,
    /// Autofocus modes the device supports (Off may be omitted)
    pub autofocus_modes: Vec<AutoFocusMode>,
}

/// Platform device error code
///
/// The well-known codes mirror the device error classes a camera stack reports
/// when opening or running a device; anything else is passed through as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformErrorCode(pub i32);

impl PlatformErrorCode {
    pub const CAMERA_IN_USE: PlatformErrorCode = PlatformErrorCode(1);
    pub const MAX_CAMERAS_IN_USE: PlatformErrorCode = PlatformErrorCode(2);
    pub const CAMERA_DISABLED: PlatformErrorCode = PlatformErrorCode(3);
    pub const CAMERA_DEVICE: PlatformErrorCode = PlatformErrorCode(4);
    pub const CAMERA_SERVICE: PlatformErrorCode = PlatformErrorCode(5);
}

impl std::fmt::Display for PlatformErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Repeating capture request issued once per streaming session
///
/// There is no per-frame completion callback: the platform streams into every
/// target until the session or device is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Number of output targets the request streams into
    pub target_count: usize,
    /// Autofocus mode to apply, if the device reports any
    pub autofocus: Option<AutoFocusMode>,
}

/// Pixel format for camera frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    RGBA,
    /// RGB24 - 24-bit RGB (3 bytes per pixel, no alpha)
    RGB24,
    /// NV12 - Semi-planar 4:2:0 (Y plane + interleaved UV plane)
    NV12,
    /// I420 - Planar 4:2:0 (separate Y, U, V planes)
    I420,
    /// YUYV - Packed 4:2:2 (Y0 U Y1 V interleaved)
    YUYV,
    /// Gray8 - 8-bit grayscale (single channel)
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel in the first plane (the one `stride` refers to)
    pub fn primary_plane_bytes_per_pixel(&self) -> usize {
        match self {
            Self::RGBA => 4,
            Self::RGB24 => 3,
            Self::YUYV => 2,
            Self::NV12 | Self::I420 | Self::Gray8 => 1,
        }
    }

    /// Check if this format stores luma as its own leading plane
    pub fn has_luma_plane(&self) -> bool {
        matches!(self, Self::NV12 | Self::I420 | Self::Gray8)
    }
}

/// An image handed to a frame sink by the platform
///
/// `data` holds all planes contiguously; `stride` is the row pitch of the
/// first plane in bytes.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Arc<[u8]>,
    /// Timestamp when the platform captured the image
    pub captured_at: Instant,
}

impl RawImage {
    /// Tightly packed 8-bit grayscale image
    pub fn gray8(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width,
            format: PixelFormat::Gray8,
            data: Arc::from(data.into_boxed_slice()),
            captured_at: Instant::now(),
        }
    }
}
