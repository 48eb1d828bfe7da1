// SPDX-License-Identifier: MPL-2.0

//! Barcode Camera - camera capture and frame scheduling for live barcode scanning
//!
//! This library opens a camera, streams frames into a bounded queue and feeds
//! them, one at a time, to a barcode detector.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera platform traits, session manager, V4L2 and virtual backends
//! - [`frame_processor`]: Frame scheduler, rotation compensation and detectors
//! - [`scanner`]: The caller-facing [`BarcodeScanner`]
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let config = Config::load(None)?;
//! let platform = get_platform_for_type(config.backend);
//! let scanner = BarcodeScanner::from_config(&config, platform, runtime.handle().clone());
//! scanner.start();
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod frame_processor;
pub mod scanner;

// Re-export commonly used types
pub use backends::camera::{CameraFacing, CameraSessionManager, SessionPhase, get_platform_for_type};
pub use config::Config;
pub use errors::{AppError, AppResult, CameraError, FrameError};
pub use frame_processor::{Detection, FrameScheduler, QrDetector, ScanResult, SchedulerState};
pub use scanner::{BarcodeScanner, ScannerSettings};
