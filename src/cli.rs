// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for barcode scanning
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Scanning barcodes from a camera or from image files

use barcode_camera::backends::camera::{
    CameraCharacteristics, CameraFacing, CameraPlatform, DeviceRotation, OutputSize,
    get_platform_for_type,
};
use barcode_camera::backends::virtual_camera::{FileFrameSource, VirtualCamera, VirtualPlatform};
use barcode_camera::errors::CameraError;
use barcode_camera::{AppError, AppResult};
use barcode_camera::frame_processor::types::ScanResult;
use barcode_camera::{BarcodeScanner, Config};
use chrono::Local;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Camera id of the virtual camera fed from image files
const FILE_CAMERA_ID: &str = "file-source";

/// Options of the `scan` command
pub struct ScanOptions {
    pub config: Option<PathBuf>,
    pub facing: Option<CameraFacing>,
    pub min_width: Option<u32>,
    pub rotation: DeviceRotation,
    pub images: Vec<PathBuf>,
    pub timeout: Option<u64>,
    pub once: bool,
}

enum StopReason {
    Interrupted,
    Failed(CameraError),
}

/// List all available cameras
pub fn list_cameras(config_path: Option<&Path>) -> AppResult<()> {
    let config = Config::load(config_path)?;
    let platform = get_platform_for_type(config.backend);
    let ids = platform.camera_ids()?;

    if ids.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras ({}):", config.backend);
    println!();
    for id in &ids {
        match platform.characteristics(id) {
            Ok(characteristics) => print_camera(&characteristics),
            Err(e) => println!("  {} (unavailable: {})", id, e),
        }
        println!();
    }

    Ok(())
}

fn print_camera(camera: &CameraCharacteristics) {
    println!("  {}", camera.id);
    println!("      Facing: {}", camera.facing);
    println!("      Sensor orientation: {}", camera.sensor_orientation);

    // Show the largest sizes first
    let mut sizes = camera.output_sizes.clone();
    sizes.sort_by(|a, b| (b.width * b.height).cmp(&(a.width * a.height)));
    let size_strs: Vec<String> = sizes.iter().take(4).map(OutputSize::to_string).collect();
    println!("      Sizes: {}", size_strs.join(", "));

    let af_strs: Vec<String> = camera.autofocus_modes.iter().map(|m| m.to_string()).collect();
    if af_strs.is_empty() {
        println!("      Autofocus: off");
    } else {
        println!("      Autofocus: {}", af_strs.join(", "));
    }
}

/// Scan barcodes until Ctrl+C, the timeout, or the first result with `--once`
pub fn scan(options: ScanOptions) -> AppResult<()> {
    let mut config = Config::load(options.config.as_deref())?;
    if let Some(facing) = options.facing {
        config.camera_facing = facing;
    }
    if options.min_width.is_some() {
        config.custom_min_width = options.min_width;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("barcode-detect")
        .enable_all()
        .build()?;

    let (platform, file_platform) = if options.images.is_empty() {
        (get_platform_for_type(config.backend), None)
    } else {
        let platform = Arc::new(image_file_platform(&options.images, config.camera_facing)?);
        (platform.clone() as Arc<dyn CameraPlatform>, Some(platform))
    };

    let scanner = BarcodeScanner::from_config(&config, platform, runtime.handle().clone());
    scanner.set_device_rotation(options.rotation);

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel();

    let error_tx = stop_tx.clone();
    scanner.add_error_listener(Arc::new(move |error: &CameraError| {
        let _ = error_tx.send(StopReason::Failed(error.clone()));
    }));

    // Set up Ctrl+C handler
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(StopReason::Interrupted);
    })
    .map_err(|e| AppError::Other(format!("Failed to install Ctrl+C handler: {}", e)))?;

    let mut detections = scanner.detections();
    scanner.start();
    if let Some(platform) = &file_platform {
        platform.start_default_pump()?;
    }

    println!("Scanning... (press Ctrl+C to stop)");

    let timeout = options.timeout.map(Duration::from_secs);
    let outcome = runtime.block_on(async {
        let deadline = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                Some(result) = detections.next() => {
                    print_result(&result);
                    if options.once {
                        return Ok(());
                    }
                }
                Some(reason) = stop_rx.recv() => {
                    return match reason {
                        StopReason::Interrupted => {
                            println!();
                            println!("Stopping...");
                            Ok(())
                        }
                        StopReason::Failed(error) => Err(error),
                    };
                }
                _ = &mut deadline => {
                    println!("Timed out");
                    return Ok(());
                }
            }
        }
    });

    if let Some(platform) = &file_platform {
        platform.stop_pump();
    }
    scanner.release();

    let stats = scanner.stats();
    println!(
        "Frames: {} ({} scanned, {} dropped), barcodes: {}",
        stats.frames,
        stats.forwarded,
        stats.dropped_busy + stats.dropped_paused,
        stats.detections
    );

    outcome.map_err(Into::into)
}

fn print_result(result: &ScanResult) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    for detection in &result.detections {
        println!(
            "[{}] {}: {} (at {:.2},{:.2} size {:.2}x{:.2})",
            timestamp,
            detection.format,
            detection.content,
            detection.bounds.x,
            detection.bounds.y,
            detection.bounds.width,
            detection.bounds.height
        );
    }
}

/// Virtual platform with one camera streaming the given image files
fn image_file_platform(paths: &[PathBuf], facing: CameraFacing) -> AppResult<VirtualPlatform> {
    let source = FileFrameSource::open(paths)?;
    if source.is_empty() {
        return Err("No image files found".into());
    }
    println!("Loaded {} image(s)", source.len());

    let mut sizes: Vec<OutputSize> = Vec::new();
    let mut probe = source.clone();
    for _ in 0..source.len() {
        if let Some(frame) = probe.next_frame() {
            let size = OutputSize::new(frame.width, frame.height);
            if !sizes.contains(&size) {
                sizes.push(size);
            }
        }
    }

    let camera = VirtualCamera::new(FILE_CAMERA_ID, facing).with_output_sizes(sizes);
    let platform = VirtualPlatform::new(vec![camera]);
    platform.set_frame_source(source);
    Ok(platform)
}
