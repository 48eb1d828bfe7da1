// SPDX-License-Identifier: MPL-2.0

//! Error types for the barcode camera pipeline

use crate::backends::camera::types::PlatformErrorCode;
use thiserror::Error;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Camera-related errors
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    /// Platform backend errors
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Frame intake invariant violations
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    /// I/O errors from runtime or thread setup
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Typed camera errors reported to the scanner's error listeners
///
/// None of these are retried automatically. Disconnection is deliberately
/// absent: it tears the session down without a report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// The platform reports no camera at all
    #[error("No camera available")]
    NoCameraAvailable,
    /// The device is held by another client
    #[error("Camera is in use by another client")]
    CameraInUse,
    /// The system-wide limit of open cameras was reached
    #[error("Maximum number of open cameras reached")]
    MaxCamerasInUse,
    /// Camera access is disabled by policy
    #[error("Camera is disabled")]
    CameraDisabled,
    /// Fatal error inside the device
    #[error("Camera device error")]
    CameraDeviceError,
    /// Fatal error inside the camera service
    #[error("Camera service error")]
    CameraServiceError,
    /// Permission/access failure while creating a session or issuing requests
    #[error("Camera access denied: {0}")]
    CameraAccessDenied(String),
    /// The platform could not configure the capture session
    #[error("Capture session configuration failed")]
    SessionConfigurationFailed,
    /// Unmapped platform error code
    #[error("Camera error (platform code {0})")]
    Generic(i32),
}

impl CameraError {
    /// Map a platform device error code to a typed error kind
    pub fn from_platform_code(code: PlatformErrorCode) -> Self {
        match code {
            PlatformErrorCode::CAMERA_IN_USE => CameraError::CameraInUse,
            PlatformErrorCode::MAX_CAMERAS_IN_USE => CameraError::MaxCamerasInUse,
            PlatformErrorCode::CAMERA_DISABLED => CameraError::CameraDisabled,
            PlatformErrorCode::CAMERA_DEVICE => CameraError::CameraDeviceError,
            PlatformErrorCode::CAMERA_SERVICE => CameraError::CameraServiceError,
            PlatformErrorCode(other) => CameraError::Generic(other),
        }
    }
}

/// Errors raised by the frame scheduler that are not ordinary drops
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// A frame arrived while no camera facing can be resolved
    #[error("Frame received while no camera is open")]
    CameraNotOpen,
}

/// Errors reported by a detector for a single frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectorError {
    /// Frame could not be converted into something the detector reads
    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),
    /// Decoding failed
    #[error("Detection failed: {0}")]
    Failed(String),
    /// Detection task was cancelled or panicked
    #[error("Detection task aborted: {0}")]
    Aborted(String),
}

/// Errors returned synchronously by camera platform calls
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Access to the device or session was refused
    #[error("Access denied: {0}")]
    AccessDenied(String),
    /// Device-level failure with a platform code
    #[error("Device error (code {0})")]
    Device(PlatformErrorCode),
    /// Camera id is unknown to the platform
    #[error("Unknown camera: {0}")]
    UnknownCamera(String),
    /// I/O error from the underlying device node
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Image file frame source failed to load
    #[error("Frame source error: {0}")]
    Source(#[from] image::ImageError),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid JSON for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}
