// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 capture session and streaming loop

use super::{CaptureSlot, SharedCallback, controls, event_for_error, report};
use crate::backends::camera::format_converters::{luma_plane, mjpeg_to_luma};
use crate::backends::camera::frame_loop::{CaptureLoopController, StopSignal};
use crate::backends::camera::types::{CaptureRequest, PixelFormat, PlatformErrorCode, RawImage};
use crate::backends::camera::{CaptureSession, DeviceEvent, FrameSink};
use crate::constants::{V4L2_BUFFER_COUNT, V4L2_MAX_CONSECUTIVE_ERRORS};
use crate::errors::PlatformError;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;

/// Capture session bound to one negotiated format
///
/// Every captured buffer is reduced to an 8-bit luma image and submitted to
/// all outputs.
pub struct V4l2Session {
    path: PathBuf,
    device: Arc<Device>,
    format: v4l::Format,
    outputs: Vec<Arc<dyn FrameSink>>,
    callback: SharedCallback,
    capture: CaptureSlot,
}

impl V4l2Session {
    pub(super) fn new(
        path: PathBuf,
        device: Arc<Device>,
        format: v4l::Format,
        outputs: Vec<Arc<dyn FrameSink>>,
        callback: SharedCallback,
        capture: CaptureSlot,
    ) -> Self {
        Self {
            path,
            device,
            format,
            outputs,
            callback,
            capture,
        }
    }
}

impl CaptureSession for V4l2Session {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), PlatformError> {
        let mut slot = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!("Repeating request already running");
            return Ok(());
        }

        if let Some(mode) = request.autofocus {
            let path = self.path.to_string_lossy();
            // Autofocus is best effort; a fixed-focus lens still streams
            if let Err(e) = controls::apply_autofocus(&path, mode) {
                warn!(?mode, error = %e, "Failed to apply autofocus mode");
            }
        }

        let device = Arc::clone(&self.device);
        let format = self.format;
        let outputs = self.outputs.clone();
        let callback = Arc::clone(&self.callback);

        let controller = CaptureLoopController::spawn("v4l2-capture", move |stop| {
            capture_loop(&device, format, &outputs, &callback, &stop);
        })?;

        *slot = Some(controller);
        Ok(())
    }

    fn close(self: Box<Self>) {
        let controller = self.capture.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut controller) = controller {
            controller.stop();
        }
        debug!("V4L2 capture session closed");
    }
}

fn capture_loop(
    device: &Device,
    format: v4l::Format,
    outputs: &[Arc<dyn FrameSink>],
    callback: &SharedCallback,
    stop: &StopSignal,
) {
    let mut stream = match Stream::with_buffers(device, Type::VideoCapture, V4L2_BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to create V4L2 stream");
            report(callback, event_for_error(&e));
            return;
        }
    };

    info!(
        width = format.width,
        height = format.height,
        fourcc = %format.fourcc,
        "V4L2 capture loop started"
    );

    let mut consecutive_errors = 0u32;
    let mut frame_count = 0u64;

    while !stop.is_set() {
        let (buf, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(e) => {
                if stop.is_set() {
                    break;
                }

                if let DeviceEvent::Disconnected = event_for_error(&e) {
                    info!("V4L2 device unplugged");
                    report(callback, DeviceEvent::Disconnected);
                    return;
                }

                consecutive_errors += 1;
                warn!(error = %e, consecutive_errors, "Failed to capture V4L2 frame");
                if consecutive_errors >= V4L2_MAX_CONSECUTIVE_ERRORS {
                    report(callback, DeviceEvent::Error(PlatformErrorCode::CAMERA_DEVICE));
                    return;
                }
                continue;
            }
        };
        consecutive_errors = 0;

        let used = meta.bytesused as usize;
        let payload = if used > 0 && used <= buf.len() { &buf[..used] } else { buf };

        let Some(image) = decode_luma(payload, &format) else {
            trace!(len = payload.len(), "Dropping undecodable V4L2 buffer");
            continue;
        };

        frame_count += 1;
        if frame_count % 30 == 0 {
            debug!(frame = frame_count, "V4L2 capture progress");
        }

        for sink in outputs {
            Arc::clone(sink).submit(image.clone());
        }
    }

    info!(frames = frame_count, "V4L2 capture loop stopped");
}

/// Reduce one captured buffer to a Gray8 image
fn decode_luma(buf: &[u8], format: &v4l::Format) -> Option<RawImage> {
    let captured_at = Instant::now();
    let fourcc = format.fourcc;

    let (width, height, luma) = if fourcc == FourCC::new(b"MJPG") {
        match mjpeg_to_luma(buf) {
            Ok(decoded) => decoded,
            Err(e) => {
                trace!(error = %e, "Failed to decode MJPEG frame");
                return None;
            }
        }
    } else {
        let layout = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::YUYV
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Gray8
        } else if fourcc == FourCC::new(b"NV12") {
            PixelFormat::NV12
        } else {
            return None;
        };

        let bpp = layout.primary_plane_bytes_per_pixel() as u32;
        let stride = if format.stride >= format.width * bpp {
            format.stride
        } else {
            format.width * bpp
        };
        let luma = luma_plane(buf, format.width, format.height, stride, layout)?;
        (format.width, format.height, luma)
    };

    let mut image = RawImage::gray8(width, height, luma);
    image.captured_at = captured_at;
    Some(image)
}
