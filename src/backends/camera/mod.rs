// SPDX-License-Identifier: MPL-2.0

//! Camera backend abstraction
//!
//! This module provides a trait-based abstraction over camera platforms whose
//! device and session APIs are asynchronous and callback driven.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  BarcodeScanner      │
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ CameraSessionManager │  ← Lifecycle state machine, single owner of the handle
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ CameraPlatform trait │  ← Enumerate, query, open (async)
//! └──────────┬───────────┘
//!            │
//!       ┌────┴─────┐
//!       ▼          ▼
//!   ┌──────┐  ┌─────────┐
//!   │ V4L2 │  │ Virtual │
//!   └──────┘  └─────────┘
//! ```
//!
//! # Callback contract
//!
//! Platforms must never invoke a callback before the call that registered it
//! has returned. Callbacks are delivered from platform threads (or a posted
//! event queue) and may race with each other and with the caller.

pub mod format_converters;
pub mod frame_loop;
pub mod frame_queue;
pub mod manager;
pub mod selection;
pub mod types;
pub mod v4l2;

pub use frame_queue::{Frame, FrameQueue};
pub use manager::{CameraSessionManager, SessionObserver, SessionPhase};
pub use types::*;

use crate::errors::PlatformError;
use std::sync::Arc;

/// Lifecycle events for an opened (or opening) device
pub enum DeviceEvent {
    /// The device is open; ownership of the handle moves to the receiver
    Opened(Box<dyn CameraDevice>),
    /// The device went away
    Disconnected,
    /// The device failed to open or failed while open
    Error(PlatformErrorCode),
}

impl std::fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            DeviceEvent::Disconnected => write!(f, "Disconnected"),
            DeviceEvent::Error(code) => write!(f, "Error({})", code),
        }
    }
}

/// Outcome of an asynchronous capture session configuration
pub enum SessionEvent {
    /// The session is ready to accept a repeating request
    Configured(Box<dyn CaptureSession>),
    /// The outputs could not be configured
    ConfigureFailed,
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Configured(_) => write!(f, "Configured"),
            SessionEvent::ConfigureFailed => write!(f, "ConfigureFailed"),
        }
    }
}

/// Receives every lifecycle event of one open request
pub type DeviceCallback = Box<dyn FnMut(DeviceEvent) + Send>;

/// Receives the outcome of one session configuration
pub type SessionCallback = Box<dyn FnOnce(SessionEvent) + Send>;

/// Output surface a capture session streams into
pub trait FrameSink: Send + Sync {
    /// Resolution the sink was created for
    fn size(&self) -> OutputSize;

    /// Preferred pixel format of submitted images
    fn format(&self) -> PixelFormat;

    /// Hand one captured image to the sink
    fn submit(self: Arc<Self>, image: RawImage);
}

/// Camera platform: device registry plus asynchronous open
pub trait CameraPlatform: Send + Sync {
    /// Camera ids in platform order
    fn camera_ids(&self) -> Result<Vec<String>, PlatformError>;

    /// Static characteristics of one camera
    fn characteristics(&self, camera_id: &str) -> Result<CameraCharacteristics, PlatformError>;

    /// Start opening a camera
    ///
    /// Returns immediately. The outcome, and any later disconnect or device
    /// error, is delivered through `callback`. A synchronous `Err` means the
    /// open was refused outright and the callback will not be called.
    fn open_camera(&self, camera_id: &str, callback: DeviceCallback) -> Result<(), PlatformError>;
}

/// Exclusive handle to an open camera device
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Start configuring a capture session over `outputs`
    ///
    /// A synchronous `Err` is an access failure; otherwise the outcome
    /// arrives through `callback`.
    fn create_capture_session(
        &mut self,
        outputs: Vec<Arc<dyn FrameSink>>,
        callback: SessionCallback,
    ) -> Result<(), PlatformError>;

    /// Close the device; any session created on it stops streaming
    fn close(self: Box<Self>);
}

/// Configured capture session bound to one device
pub trait CaptureSession: Send {
    /// Start streaming continuously into the session's outputs
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), PlatformError>;

    /// Stop streaming and tear the session down
    fn close(self: Box<Self>);
}

/// Get a platform instance for the given backend type
///
/// The virtual backend starts without cameras; callers add them through
/// [`crate::backends::virtual_camera::VirtualPlatform`] directly.
pub fn get_platform_for_type(backend: CameraBackendType) -> Arc<dyn CameraPlatform> {
    match backend {
        CameraBackendType::V4l2 => Arc::new(v4l2::V4l2Platform::new()),
        CameraBackendType::Virtual => Arc::new(crate::backends::virtual_camera::VirtualPlatform::new(Vec::new())),
    }
}
