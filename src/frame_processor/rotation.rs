// SPDX-License-Identifier: GPL-3.0-only

//! Rotation compensation for captured frames
//!
//! A frame has to be rotated by an amount that depends both on how the device
//! is currently held and on the angle the sensor is mounted at.

use crate::backends::camera::types::{DeviceRotation, SensorRotation};

/// Fixed offset applied on top of the sensor mounting angle
const SENSOR_OFFSET_DEGREES: u32 = 270;

/// Base compensation for the current device rotation
pub fn base_compensation(device_rotation: DeviceRotation) -> u32 {
    match device_rotation {
        DeviceRotation::Rotation0 => 90,
        DeviceRotation::Rotation90 => 0,
        DeviceRotation::Rotation180 => 270,
        DeviceRotation::Rotation270 => 180,
    }
}

/// Fold the sensor mounting angle into a base compensation
///
/// Sensors mounted at 270° end up a half turn away from the common 90° case.
pub fn apply_sensor_orientation(base_degrees: u32, sensor: SensorRotation) -> SensorRotation {
    let degrees = (base_degrees + sensor.degrees() + SENSOR_OFFSET_DEGREES) % 360;
    SensorRotation::from_degrees_int(degrees as i32)
}

/// Rotation needed for a frame to appear upright
///
/// Two stages: the device rotation is first mapped through
/// [`base_compensation`] (0→90, 90→0, 180→270, 270→180), and only that base
/// goes into the modular step of [`apply_sensor_orientation`]. An upright
/// device with a 90° sensor therefore yields 90°, while
/// `apply_sensor_orientation(0, 90°)` alone yields 0°.
///
/// Without a known sensor orientation (no camera resolvable) the frame is
/// passed on unrotated.
pub fn rotation_compensation(
    device_rotation: DeviceRotation,
    sensor_orientation: Option<SensorRotation>,
) -> SensorRotation {
    match sensor_orientation {
        Some(sensor) => apply_sensor_orientation(base_compensation(device_rotation), sensor),
        None => SensorRotation::None,
    }
}
