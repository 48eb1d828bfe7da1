// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture
//!
//! This module provides the camera platform implementations:
//! - Camera capture via V4L2
//! - Scripted virtual cameras fed from image files or test code
//!
//! # Modules
//!
//! - [`camera`]: Platform traits, session manager and the V4L2 backend
//! - [`virtual_camera`]: In-process camera platform with fault injection

pub mod camera;
pub mod virtual_camera;
