// SPDX-License-Identifier: GPL-3.0-only

//! QR code detection task
//!
//! This module implements QR code detection using the rqrr crate. Frames
//! are reduced to luma, decimated when larger than the processing limit, and
//! decoded on a blocking worker so the async runtime keeps moving.

use super::Detector;
use crate::backends::camera::Frame;
use crate::backends::camera::format_converters::luma_plane;
use crate::constants::DEFAULT_QR_MAX_DIMENSION;
use crate::errors::DetectorError;
use crate::frame_processor::types::{BarcodeFormat, Detection, FrameMetadata, FrameRegion};
use futures::future::BoxFuture;
use tracing::{debug, trace, warn};

/// QR code detector
///
/// Analyzes camera frames to detect and decode QR codes.
/// Optimized for real-time processing with frame decimation.
pub struct QrDetector {
    /// Maximum dimension for processing (larger frames are decimated)
    max_dimension: u32,
}

impl Default for QrDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl QrDetector {
    pub fn new() -> Self {
        Self::with_max_dimension(DEFAULT_QR_MAX_DIMENSION)
    }

    /// Create a QR detector with custom max dimension
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }
}

impl Detector for QrDetector {
    fn name(&self) -> &'static str {
        "qr"
    }

    fn detect<'a>(
        &'a self,
        frame: &'a Frame,
        metadata: &'a FrameMetadata,
    ) -> BoxFuture<'a, Result<Vec<Detection>, DetectorError>> {
        let max_dimension = self.max_dimension;

        Box::pin(async move {
            let luma = luma_plane(frame.data(), frame.width(), frame.height(), frame.stride(), frame.format())
                .ok_or_else(|| {
                    DetectorError::UnsupportedFrame(format!(
                        "{}x{} {:?} frame with stride {} and {} bytes",
                        frame.width(),
                        frame.height(),
                        frame.format(),
                        frame.stride(),
                        frame.data().len()
                    ))
                })?;

            let width = frame.width();
            let height = frame.height();
            let rotation = metadata.rotation;

            // Run detection in a blocking task to avoid blocking the async runtime
            tokio::task::spawn_blocking(move || {
                let detections = detect_sync(&luma, width, height, max_dimension);
                detections
                    .into_iter()
                    .map(|mut detection| {
                        detection.bounds = detection.bounds.rotated(rotation);
                        detection
                    })
                    .collect()
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "QR detection task panicked");
                DetectorError::Aborted(e.to_string())
            })
        })
    }
}

/// Synchronous QR detection over a tightly packed luma plane
fn detect_sync(luma: &[u8], width: u32, height: u32, max_dimension: u32) -> Vec<Detection> {
    let start = std::time::Instant::now();

    let factor = decimation_factor(width, height, max_dimension);
    let (proc_luma, proc_width, proc_height) = if factor > 1 {
        decimate(luma, width, height, factor)
    } else {
        (luma.to_vec(), width, height)
    };

    trace!(
        proc_width,
        proc_height,
        factor,
        conversion_ms = start.elapsed().as_millis(),
        "Prepared luma image for processing"
    );

    let w = proc_width as usize;
    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(w, proc_height as usize, |x, y| proc_luma[y * w + x]);
    let grids = prepared.detect_grids();

    let mut detections = Vec::with_capacity(grids.len());

    for grid in grids {
        let content = match grid.decode() {
            Ok((_meta, content)) => content,
            Err(e) => {
                debug!(error = %e, "Failed to decode QR code");
                continue;
            }
        };

        let min_x = grid.bounds.iter().map(|p| p.x).min().unwrap_or(0).max(0) as u32;
        let max_x = grid.bounds.iter().map(|p| p.x).max().unwrap_or(0).max(0) as u32;
        let min_y = grid.bounds.iter().map(|p| p.y).min().unwrap_or(0).max(0) as u32;
        let max_y = grid.bounds.iter().map(|p| p.y).max().unwrap_or(0).max(0) as u32;

        // Scale back to original frame coordinates
        let x = (min_x * factor).min(width);
        let y = (min_y * factor).min(height);
        let region = FrameRegion::from_pixels(
            x,
            y,
            ((max_x - min_x) * factor).min(width - x),
            ((max_y - min_y) * factor).min(height - y),
            width,
            height,
        );

        debug!(
            content = %content,
            x = region.x,
            y = region.y,
            width = region.width,
            height = region.height,
            "Detected QR code"
        );

        detections.push(Detection {
            format: BarcodeFormat::QrCode,
            content,
            bounds: region,
        });
    }

    if !detections.is_empty() {
        debug!(
            count = detections.len(),
            total_ms = start.elapsed().as_millis(),
            "QR detection found codes"
        );
    }

    detections
}

/// Integer step that brings the larger side down to at most `max_dimension`
fn decimation_factor(width: u32, height: u32, max_dimension: u32) -> u32 {
    let largest = width.max(height);
    largest.div_ceil(max_dimension.max(1)).max(1)
}

/// Keep every `factor`-th pixel in both directions
fn decimate(luma: &[u8], width: u32, height: u32, factor: u32) -> (Vec<u8>, u32, u32) {
    let new_width = (width / factor).max(1);
    let new_height = (height / factor).max(1);
    let src_width = width as usize;
    let step = factor as usize;

    let mut out = Vec::with_capacity((new_width * new_height) as usize);
    for y in 0..new_height as usize {
        let row = y * step * src_width;
        for x in 0..new_width as usize {
            out.push(luma[row + x * step]);
        }
    }

    (out, new_width, new_height)
}
