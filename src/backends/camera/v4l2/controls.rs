// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera-class controls used for camera characteristics
//!
//! Reads mounting orientation and sensor rotation, and drives autofocus.
//! Nodes without a control simply report `None`.

use crate::backends::camera::types::{AutoFocusMode, CameraFacing, SensorRotation};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

/// Continuous autofocus enable
pub const V4L2_CID_FOCUS_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 12;
/// Trigger a single autofocus run
pub const V4L2_CID_AUTO_FOCUS_START: u32 = V4L2_CID_CAMERA_CLASS_BASE + 28;
/// Where the camera is mounted (front/back/external)
pub const V4L2_CID_CAMERA_ORIENTATION: u32 = V4L2_CID_CAMERA_CLASS_BASE + 34;
/// Sensor mounting rotation in degrees
pub const V4L2_CID_CAMERA_SENSOR_ROTATION: u32 = V4L2_CID_CAMERA_CLASS_BASE + 35;

const V4L2_CAMERA_ORIENTATION_FRONT: i32 = 0;
const V4L2_CAMERA_ORIENTATION_BACK: i32 = 1;
const V4L2_CAMERA_ORIENTATION_EXTERNAL: i32 = 2;

const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;

/// Get control value (v4l2_control: 8 bytes)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008561B;
/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// Check if a control exists and is enabled on the device
pub fn has_control(device_path: &str, control_id: u32) -> bool {
    let Ok(file) = File::open(device_path) else {
        return false;
    };

    let mut qctrl = V4l2Queryctrl {
        id: control_id,
        ctrl_type: 0,
        name: [0; 32],
        minimum: 0,
        maximum: 0,
        step: 0,
        default_value: 0,
        flags: 0,
        reserved: [0; 2],
    };

    let result = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_QUERYCTRL, &mut qctrl as *mut V4l2Queryctrl) };

    result >= 0 && qctrl.flags & V4L2_CTRL_FLAG_DISABLED == 0
}

/// Get current value of a control
pub fn get_control(device_path: &str, control_id: u32) -> Option<i32> {
    let file = File::open(device_path).ok()?;

    let mut ctrl = V4l2Control {
        id: control_id,
        value: 0,
    };

    let result = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_G_CTRL, &mut ctrl as *mut V4l2Control) };

    if result < 0 {
        debug!(device_path, control_id, "Failed to get V4L2 control");
        return None;
    }

    Some(ctrl.value)
}

/// Set value of a control
pub fn set_control(device_path: &str, control_id: u32, value: i32) -> std::io::Result<()> {
    let file = File::open(device_path)?;

    let mut ctrl = V4l2Control { id: control_id, value };

    let result = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_S_CTRL, &mut ctrl as *mut V4l2Control) };

    if result < 0 {
        let errno = std::io::Error::last_os_error();
        warn!(device_path, control_id, value, ?errno, "Failed to set V4L2 control");
        return Err(errno);
    }

    Ok(())
}

/// Map a `V4L2_CID_CAMERA_ORIENTATION` value to a facing
pub fn facing_from_orientation(value: i32) -> CameraFacing {
    match value {
        V4L2_CAMERA_ORIENTATION_FRONT => CameraFacing::Front,
        V4L2_CAMERA_ORIENTATION_BACK => CameraFacing::Back,
        V4L2_CAMERA_ORIENTATION_EXTERNAL => CameraFacing::External,
        _ => CameraFacing::Unknown,
    }
}

/// Facing of the camera; nodes without the control are treated as external
pub fn camera_facing(device_path: &str) -> CameraFacing {
    get_control(device_path, V4L2_CID_CAMERA_ORIENTATION)
        .map(facing_from_orientation)
        .unwrap_or(CameraFacing::External)
}

/// Sensor mounting rotation, 0° when not reported
pub fn sensor_rotation(device_path: &str) -> SensorRotation {
    get_control(device_path, V4L2_CID_CAMERA_SENSOR_ROTATION)
        .map(SensorRotation::from_degrees_int)
        .unwrap_or(SensorRotation::None)
}

/// Autofocus modes the device can run
pub fn autofocus_modes(device_path: &str) -> Vec<AutoFocusMode> {
    let mut modes = Vec::new();
    if has_control(device_path, V4L2_CID_FOCUS_AUTO) {
        modes.push(AutoFocusMode::ContinuousPicture);
    }
    if has_control(device_path, V4L2_CID_AUTO_FOCUS_START) {
        modes.push(AutoFocusMode::Auto);
    }
    modes.push(AutoFocusMode::Off);
    modes
}

/// Put the device into the given autofocus mode
pub fn apply_autofocus(device_path: &str, mode: AutoFocusMode) -> std::io::Result<()> {
    match mode {
        AutoFocusMode::ContinuousPicture => set_control(device_path, V4L2_CID_FOCUS_AUTO, 1),
        AutoFocusMode::Auto => set_control(device_path, V4L2_CID_AUTO_FOCUS_START, 1),
        AutoFocusMode::Off => {
            if has_control(device_path, V4L2_CID_FOCUS_AUTO) {
                set_control(device_path, V4L2_CID_FOCUS_AUTO, 0)
            } else {
                Ok(())
            }
        }
    }
}
