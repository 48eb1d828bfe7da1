// SPDX-License-Identifier: MPL-2.0

//! Frame processor module for async frame analysis
//!
//! This module gates camera frames through a backpressure scheduler and runs
//! async detection tasks on the admitted ones. Currently implements QR code
//! detection.

pub mod rotation;
pub mod scheduler;
pub mod tasks;
pub mod types;

pub use rotation::{apply_sensor_orientation, rotation_compensation};
pub use scheduler::{
    CameraInfo, DropReason, FrameDisposition, FrameScheduler, ResultListener, SchedulerState, SchedulerStats,
};
pub use tasks::{Detector, QrDetector};
pub use types::{BarcodeFormat, Detection, FrameMetadata, FrameRegion, ScanResult};
