// SPDX-License-Identifier: MPL-2.0

//! End-to-end scanner tests over the virtual camera platform

use barcode_camera::backends::camera::{
    CameraFacing, DeviceRotation, Frame, OutputSize, RawImage, SensorRotation, SessionPhase,
};
use barcode_camera::backends::virtual_camera::{VirtualCamera, VirtualPlatform};
use barcode_camera::errors::{CameraError, DetectorError};
use barcode_camera::frame_processor::tasks::Detector;
use barcode_camera::frame_processor::types::{BarcodeFormat, Detection, FrameMetadata, FrameRegion, ScanResult};
use barcode_camera::{BarcodeScanner, ScannerSettings, SchedulerState};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

/// Reports one code for every frame whose first pixel is non-zero
struct BrightDetector;

impl Detector for BrightDetector {
    fn name(&self) -> &'static str {
        "bright"
    }

    fn detect<'a>(
        &'a self,
        frame: &'a Frame,
        _metadata: &'a FrameMetadata,
    ) -> BoxFuture<'a, Result<Vec<Detection>, DetectorError>> {
        Box::pin(async move {
            let value = frame.data().first().copied().unwrap_or(0);
            if value == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![Detection {
                format: BarcodeFormat::QrCode,
                content: format!("value-{}", value),
                bounds: FrameRegion::from_pixels(0, 0, frame.width(), frame.height(), frame.width(), frame.height()),
            }])
        })
    }
}

fn platform() -> Arc<VirtualPlatform> {
    Arc::new(VirtualPlatform::new(vec![
        VirtualCamera::new("front", CameraFacing::Front),
        VirtualCamera::new("back", CameraFacing::Back).with_sensor_orientation(SensorRotation::Rotate90),
    ]))
}

fn scanner(platform: &Arc<VirtualPlatform>) -> BarcodeScanner {
    BarcodeScanner::new(
        platform.clone(),
        Arc::new(BrightDetector),
        ScannerSettings::default(),
        tokio::runtime::Handle::current(),
    )
}

fn frame(value: u8) -> RawImage {
    RawImage::gray8(4, 4, vec![value; 16])
}

async fn wait_idle(scanner: &BarcodeScanner) {
    for _ in 0..200 {
        if scanner.state() != SchedulerState::Busy {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("detection never finished");
}

#[tokio::test]
async fn test_detections_stream() {
    let platform = platform();
    let scanner = scanner(&platform);
    let mut detections = scanner.detections();

    scanner.start();
    platform.dispatch_pending();
    assert_eq!(scanner.phase(), SessionPhase::Streaming);

    assert_eq!(platform.emit_frame("back", frame(9)), 1);
    let result: ScanResult = tokio::time::timeout(Duration::from_secs(5), detections.next())
        .await
        .expect("no detection in time")
        .expect("stream ended");

    assert_eq!(result.detections[0].content, "value-9");
    assert_eq!(result.metadata.facing, CameraFacing::Back);
    // Upright device, sensor at 90 degrees
    assert_eq!(result.metadata.rotation, SensorRotation::Rotate90);

    wait_idle(&scanner).await;
    let stats = scanner.queue_stats().unwrap();
    assert_eq!(stats.acquired, stats.released);
}

#[tokio::test]
async fn test_device_rotation_changes_metadata() {
    let platform = platform();
    let scanner = scanner(&platform);
    let mut detections = scanner.detections();
    scanner.set_device_rotation(DeviceRotation::Rotation270);

    scanner.start();
    platform.dispatch_pending();
    platform.emit_frame("back", frame(1));

    let result = tokio::time::timeout(Duration::from_secs(5), detections.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.metadata.rotation, SensorRotation::Rotate180);
}

#[tokio::test]
async fn test_paused_scanner_drops_frames() {
    let platform = platform();
    let scanner = scanner(&platform);
    scanner.start();
    platform.dispatch_pending();

    scanner.pause();
    assert_eq!(scanner.state(), SchedulerState::Paused);
    for _ in 0..3 {
        platform.emit_frame("back", frame(5));
    }

    let stats = scanner.stats();
    assert_eq!(stats.dropped_paused, 3);
    assert_eq!(stats.forwarded, 0);
    assert_eq!(scanner.queue_stats().unwrap().released, 3);

    scanner.resume();
    platform.emit_frame("back", frame(5));
    assert_eq!(scanner.stats().forwarded, 1);
    wait_idle(&scanner).await;
}

#[tokio::test]
async fn test_switching_facing_restarts_on_other_camera() {
    let platform = platform();
    let scanner = scanner(&platform);
    scanner.start();
    platform.dispatch_pending();
    assert!(platform.is_streaming("back"));

    scanner.set_camera_facing(CameraFacing::Front);
    assert_eq!(scanner.phase(), SessionPhase::Opening);
    platform.dispatch_pending();

    assert_eq!(scanner.phase(), SessionPhase::Streaming);
    assert!(platform.is_streaming("front"));
    assert!(!platform.is_streaming("back"));
    let stats = platform.handle_stats();
    assert_eq!((stats.opened, stats.live(), stats.max_live), (2, 1, 1));
}

#[tokio::test]
async fn test_facing_change_while_closed_does_not_start() {
    let platform = platform();
    let scanner = scanner(&platform);

    scanner.set_camera_facing(CameraFacing::Front);
    assert_eq!(scanner.phase(), SessionPhase::Closed);
    assert_eq!(scanner.settings().camera_facing, CameraFacing::Front);
    assert_eq!(platform.handle_stats().opened, 0);
}

#[tokio::test]
async fn test_errors_reach_listeners() {
    let platform = Arc::new(VirtualPlatform::new(vec![
        VirtualCamera::new("bare", CameraFacing::Back).with_output_sizes(Vec::new()),
    ]));
    let scanner = scanner(&platform);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    scanner.add_error_listener(Arc::new(move |error: &CameraError| {
        sink.lock().unwrap().push(error.clone());
    }));

    scanner.start();
    assert_eq!(*errors.lock().unwrap(), vec![CameraError::SessionConfigurationFailed]);
    assert_eq!(scanner.phase(), SessionPhase::Closed);
    assert_eq!(platform.handle_stats().opened, 0);
}

#[tokio::test]
async fn test_release_from_result_listener() {
    let platform = platform();
    let scanner = Arc::new(scanner(&platform));

    let weak = Arc::downgrade(&scanner);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    scanner.add_result_listener(Arc::new(move |_result: &ScanResult| {
        if let Some(scanner) = weak.upgrade() {
            scanner.release();
        }
        let _ = tx.send(());
    }));

    scanner.start();
    platform.dispatch_pending();
    platform.emit_frame("back", frame(3));

    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scanner.phase(), SessionPhase::Closed);
    assert_eq!(platform.handle_stats().live(), 0);
    // Nothing streams after release
    assert_eq!(platform.emit_frame("back", frame(3)), 0);
}

#[tokio::test]
async fn test_min_width_applies_on_next_start() {
    let platform = platform();
    let scanner = scanner(&platform);

    scanner.set_min_barcode_width(Some(1500));
    assert_eq!(scanner.settings().min_width(), 1500);
    assert_eq!(
        scanner.manager().output_size(scanner.settings().min_width()),
        Some(OutputSize::new(1920, 1080))
    );

    scanner.set_min_barcode_width(None);
    assert_eq!(scanner.settings().min_width(), 200);
}

#[tokio::test]
async fn test_drop_releases_camera() {
    let platform = platform();
    {
        let scanner = scanner(&platform);
        scanner.start();
        platform.dispatch_pending();
        assert_eq!(platform.handle_stats().live(), 1);
    }
    assert_eq!(platform.handle_stats().live(), 0);
}

#[tokio::test]
async fn test_dropped_stream_unregisters_listener() {
    let platform = platform();
    let scanner = scanner(&platform);
    let listeners = scanner.scheduler().result_listener_count();

    let detections = scanner.detections();
    let unpolled = scanner.detections();
    assert_eq!(scanner.scheduler().result_listener_count(), listeners + 2);

    drop(detections);
    drop(unpolled);
    assert_eq!(scanner.scheduler().result_listener_count(), listeners);
}

fn threaded_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn test_concurrent_starts_keep_frames_flowing() {
    let runtime = threaded_runtime();

    for _ in 0..200 {
        let platform = platform();
        let scanner = BarcodeScanner::new(
            platform.clone(),
            Arc::new(BrightDetector),
            ScannerSettings::default(),
            runtime.handle().clone(),
        );
        let barrier = Barrier::new(2);

        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    barrier.wait();
                    scanner.start();
                });
            }
        });

        platform.dispatch_pending();
        assert_eq!(scanner.phase(), SessionPhase::Streaming);
        assert_eq!(platform.handle_stats().opened, 1);

        assert_eq!(platform.emit_frame("back", frame(0)), 1);
        assert_eq!(scanner.stats().frames, 1);
        assert_eq!(scanner.queue_stats().unwrap().acquired, 1);
    }
}

#[test]
fn test_start_release_race_with_platform_thread() {
    let runtime = threaded_runtime();
    let platform = platform();
    let scanner = BarcodeScanner::new(
        platform.clone(),
        Arc::new(BrightDetector),
        ScannerSettings::default(),
        runtime.handle().clone(),
    );
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut round = 0u32;
            while !done.load(Ordering::SeqCst) {
                platform.dispatch_pending();
                platform.emit_frame("back", frame(0));
                round += 1;
                if round % 5 == 0 {
                    platform.disconnect("back");
                }
                std::thread::yield_now();
            }
        });
        scope.spawn(|| {
            for _ in 0..300 {
                scanner.start();
                std::thread::yield_now();
            }
        });

        for i in 0..500 {
            scanner.start();
            if i % 3 == 0 {
                platform.dispatch_pending();
            }
            scanner.release();
        }
        done.store(true, Ordering::SeqCst);
    });

    scanner.release();
    platform.dispatch_pending();

    assert_eq!(scanner.phase(), SessionPhase::Closed);
    assert_eq!(platform.handle_stats().live(), 0);
    assert!(scanner.queue_stats().is_none());

    // The scanner still works after the churn
    scanner.start();
    platform.dispatch_pending();
    assert_eq!(scanner.phase(), SessionPhase::Streaming);
    let before = scanner.stats().frames;
    assert_eq!(platform.emit_frame("back", frame(0)), 1);
    assert_eq!(scanner.stats().frames, before + 1);
}
