// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera platform
//!
//! Cameras are `/dev/video*` capture nodes. Facing and sensor rotation come
//! from camera-class controls, sizes from the formats the capture loop can
//! convert. Open and session configuration run on short-lived worker threads
//! so that no callback fires before the registering call returns.

mod capture;
pub mod controls;

pub use capture::V4l2Session;

use super::frame_loop::CaptureLoopController;
use super::types::*;
use super::{CameraDevice, CameraPlatform, DeviceCallback, DeviceEvent, FrameSink, SessionCallback, SessionEvent};
use crate::constants::{V4L2_FOURCC_PREFERENCE, V4L2_STEPWISE_RESOLUTIONS};
use crate::errors::PlatformError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info, warn};
use v4l::FourCC;
use v4l::framesize::FrameSizeEnum;
use v4l::prelude::*;
use v4l::video::Capture;

/// Device callback shared between the open, configure and capture threads
pub(crate) type SharedCallback = Arc<Mutex<DeviceCallback>>;

/// Deliver a device event; the callback is never re-entered
pub(crate) fn report(callback: &SharedCallback, event: DeviceEvent) {
    let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
    (*callback)(event);
}

/// Translate an ioctl/open failure into the event the manager understands
///
/// Unplug surfaces as `ENODEV` (or `ENXIO` on some drivers) and is reported as
/// a disconnect rather than an error. Unmapped errnos pass through negated.
pub fn event_for_error(error: &std::io::Error) -> DeviceEvent {
    let Some(errno) = error.raw_os_error() else {
        return DeviceEvent::Error(PlatformErrorCode::CAMERA_DEVICE);
    };

    match errno {
        libc::ENODEV | libc::ENXIO => DeviceEvent::Disconnected,
        libc::EBUSY => DeviceEvent::Error(PlatformErrorCode::CAMERA_IN_USE),
        libc::ENOSPC | libc::EMFILE | libc::ENFILE => DeviceEvent::Error(PlatformErrorCode::MAX_CAMERAS_IN_USE),
        libc::EACCES | libc::EPERM => DeviceEvent::Error(PlatformErrorCode::CAMERA_DISABLED),
        libc::EIO => DeviceEvent::Error(PlatformErrorCode::CAMERA_DEVICE),
        // Negated so raw errnos never collide with the well-known codes
        other => DeviceEvent::Error(PlatformErrorCode(-other)),
    }
}

/// Camera platform over the kernel's V4L2 capture nodes
pub struct V4l2Platform {
    root: PathBuf,
}

impl V4l2Platform {
    pub fn new() -> Self {
        Self::with_root("/dev")
    }

    /// Platform scanning `root` instead of `/dev`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn device_path(&self, camera_id: &str) -> Result<PathBuf, PlatformError> {
        let path = Path::new(camera_id);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(camera_id)
        };

        if path.exists() {
            Ok(path)
        } else {
            Err(PlatformError::UnknownCamera(camera_id.to_string()))
        }
    }
}

impl Default for V4l2Platform {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraPlatform for V4l2Platform {
    fn camera_ids(&self) -> Result<Vec<String>, PlatformError> {
        let mut nodes: Vec<(u32, PathBuf)> = std::fs::read_dir(&self.root)?
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let index = name.to_str()?.strip_prefix("video")?.parse::<u32>().ok()?;
                Some((index, entry.path()))
            })
            .collect();
        nodes.sort_by_key(|(index, _)| *index);

        let ids = nodes
            .into_iter()
            .filter(|(_, path)| is_capture_node(path))
            .map(|(_, path)| path.to_string_lossy().to_string())
            .collect::<Vec<_>>();

        debug!(count = ids.len(), "Enumerated V4L2 capture nodes");
        Ok(ids)
    }

    fn characteristics(&self, camera_id: &str) -> Result<CameraCharacteristics, PlatformError> {
        let path = self.device_path(camera_id)?;
        let path_str = path.to_string_lossy().to_string();
        let device = Device::with_path(&path)?;

        Ok(CameraCharacteristics {
            id: camera_id.to_string(),
            facing: controls::camera_facing(&path_str),
            sensor_orientation: controls::sensor_rotation(&path_str),
            output_sizes: supported_sizes(&device),
            autofocus_modes: controls::autofocus_modes(&path_str),
        })
    }

    fn open_camera(&self, camera_id: &str, callback: DeviceCallback) -> Result<(), PlatformError> {
        let path = self.device_path(camera_id)?;
        let id = camera_id.to_string();
        let callback: SharedCallback = Arc::new(Mutex::new(callback));

        thread::Builder::new()
            .name("v4l2-open".to_string())
            .spawn(move || match Device::with_path(&path) {
                Ok(device) => {
                    info!(camera_id = %id, "V4L2 device opened");
                    let device = V4l2Device {
                        id,
                        path,
                        device: Arc::new(device),
                        callback: Arc::clone(&callback),
                        capture: Arc::new(Mutex::new(None)),
                    };
                    report(&callback, DeviceEvent::Opened(Box::new(device)));
                }
                Err(e) => {
                    warn!(camera_id = %id, error = %e, "Failed to open V4L2 device");
                    report(&callback, event_for_error(&e));
                }
            })?;

        Ok(())
    }
}

/// Capture loop slot shared by a device and the session created on it
pub(crate) type CaptureSlot = Arc<Mutex<Option<CaptureLoopController>>>;

/// Open V4L2 capture node
pub struct V4l2Device {
    id: String,
    path: PathBuf,
    device: Arc<Device>,
    callback: SharedCallback,
    capture: CaptureSlot,
}

impl CameraDevice for V4l2Device {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        outputs: Vec<Arc<dyn FrameSink>>,
        callback: SessionCallback,
    ) -> Result<(), PlatformError> {
        let Some(size) = outputs.first().map(|sink| sink.size()) else {
            return Err(PlatformError::AccessDenied("capture session needs an output".to_string()));
        };

        let device = Arc::clone(&self.device);
        let device_callback = Arc::clone(&self.callback);
        let capture = Arc::clone(&self.capture);
        let path = self.path.clone();
        let id = self.id.clone();

        thread::Builder::new()
            .name("v4l2-configure".to_string())
            .spawn(move || match negotiate_format(&device, size) {
                Ok(Some(format)) => {
                    info!(
                        camera_id = %id,
                        width = format.width,
                        height = format.height,
                        fourcc = %format.fourcc,
                        "V4L2 format configured"
                    );
                    let session = V4l2Session::new(path, device, format, outputs, device_callback, capture);
                    callback(SessionEvent::Configured(Box::new(session)));
                }
                Ok(None) => {
                    warn!(camera_id = %id, %size, "No convertible format accepted by device");
                    callback(SessionEvent::ConfigureFailed);
                }
                Err(e) => match event_for_error(&e) {
                    // Busy or unplugged devices are device-level, not configuration, failures
                    event @ (DeviceEvent::Disconnected | DeviceEvent::Error(PlatformErrorCode::CAMERA_IN_USE)) => {
                        warn!(camera_id = %id, error = %e, "Device unavailable while configuring");
                        report(&device_callback, event);
                    }
                    _ => {
                        warn!(camera_id = %id, error = %e, "Failed to configure V4L2 format");
                        callback(SessionEvent::ConfigureFailed);
                    }
                },
            })?;

        Ok(())
    }

    fn close(self: Box<Self>) {
        let controller = lock(&self.capture).take();
        if let Some(mut controller) = controller {
            controller.stop();
        }
        info!(camera_id = %self.id, "V4L2 device closed");
    }
}

/// Negotiate the first preferred fourcc the device supports at `size`
///
/// Returns `Ok(None)` when the device offers none of the convertible formats.
fn negotiate_format(device: &Device, size: OutputSize) -> std::io::Result<Option<v4l::Format>> {
    let offered: Vec<FourCC> = device.enum_formats()?.into_iter().map(|desc| desc.fourcc).collect();

    for fourcc in V4L2_FOURCC_PREFERENCE.iter().map(|code| FourCC::new(code)) {
        if !offered.contains(&fourcc) {
            continue;
        }

        let requested = v4l::Format::new(size.width, size.height, fourcc);
        let actual = device.set_format(&requested)?;
        if actual.fourcc == fourcc {
            return Ok(Some(actual));
        }
        debug!(requested = %fourcc, actual = %actual.fourcc, "Driver substituted format");
    }

    Ok(None)
}

/// Sizes offered in any of the convertible formats, in enumeration order
fn supported_sizes(device: &Device) -> Vec<OutputSize> {
    let mut sizes = Vec::new();

    let Ok(formats) = device.enum_formats() else {
        return sizes;
    };

    for desc in formats {
        if !V4L2_FOURCC_PREFERENCE.iter().any(|code| FourCC::new(code) == desc.fourcc) {
            continue;
        }

        let Ok(frame_sizes) = device.enum_framesizes(desc.fourcc) else {
            continue;
        };

        for frame_size in frame_sizes {
            match frame_size.size {
                FrameSizeEnum::Discrete(discrete) => {
                    push_unique(&mut sizes, OutputSize::new(discrete.width, discrete.height));
                }
                FrameSizeEnum::Stepwise(step) => {
                    // Add common resolutions
                    for (w, h) in V4L2_STEPWISE_RESOLUTIONS {
                        if w >= step.min_width && w <= step.max_width && h >= step.min_height && h <= step.max_height {
                            push_unique(&mut sizes, OutputSize::new(w, h));
                        }
                    }
                }
            }
        }
    }

    sizes
}

fn push_unique(sizes: &mut Vec<OutputSize>, size: OutputSize) {
    if !sizes.contains(&size) {
        sizes.push(size);
    }
}

fn is_capture_node(path: &Path) -> bool {
    Device::with_path(path)
        .and_then(|device| device.query_caps())
        .map(|caps| caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE))
        .unwrap_or(false)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
