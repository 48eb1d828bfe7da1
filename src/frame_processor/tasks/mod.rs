// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing tasks
//!
//! This module contains the detector abstraction the scheduler forwards
//! frames to, and the bundled QR implementation.

pub mod qr_detector;

pub use qr_detector::QrDetector;

use super::types::{Detection, FrameMetadata};
use crate::backends::camera::Frame;
use crate::errors::DetectorError;
use futures::future::BoxFuture;

/// Decodes barcodes out of one frame at a time
///
/// The frame stays owned by the scheduler: the detector only borrows it, and
/// the returned future completing (either way) is the signal that the frame
/// may be released.
pub trait Detector: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn detect<'a>(
        &'a self,
        frame: &'a Frame,
        metadata: &'a FrameMetadata,
    ) -> BoxFuture<'a, Result<Vec<Detection>, DetectorError>>;

    /// Whether the detector wants new frames held back
    fn is_busy(&self) -> bool {
        false
    }
}
