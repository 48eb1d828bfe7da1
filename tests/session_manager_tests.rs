// SPDX-License-Identifier: MPL-2.0

//! Session manager lifecycle tests against the virtual camera platform

use barcode_camera::backends::camera::{
    CameraFacing, CameraSessionManager, FrameQueue, FrameSink, OutputSize, PixelFormat, PlatformErrorCode,
    RawImage, SensorRotation, SessionObserver, SessionPhase,
};
use barcode_camera::backends::virtual_camera::{FaultPlan, VirtualCamera, VirtualPlatform};
use barcode_camera::errors::CameraError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex, OnceLock, Weak};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Ready(String),
    Streaming(String),
    Error(CameraError),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Seen>>,
    /// Set to release the manager from inside the ready notification
    release_on_ready: Mutex<bool>,
    manager: OnceLock<Weak<CameraSessionManager>>,
}

impl Recorder {
    fn events(&self) -> Vec<Seen> {
        self.events.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<CameraError> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Seen::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for Recorder {
    fn on_camera_ready(&self, camera_id: &str) {
        self.events.lock().unwrap().push(Seen::Ready(camera_id.to_string()));
        if *self.release_on_ready.lock().unwrap() {
            if let Some(manager) = self.manager.get().and_then(Weak::upgrade) {
                manager.release();
            }
        }
    }

    fn on_streaming(&self, camera_id: &str) {
        self.events.lock().unwrap().push(Seen::Streaming(camera_id.to_string()));
    }

    fn on_error(&self, error: CameraError) {
        self.events.lock().unwrap().push(Seen::Error(error));
    }
}

struct Harness {
    platform: Arc<VirtualPlatform>,
    recorder: Arc<Recorder>,
    manager: Arc<CameraSessionManager>,
    queue: Arc<FrameQueue>,
}

impl Harness {
    fn new(cameras: Vec<VirtualCamera>, facing: CameraFacing) -> Self {
        let platform = Arc::new(VirtualPlatform::new(cameras));
        let recorder = Arc::new(Recorder::default());
        let manager = CameraSessionManager::new(platform.clone(), recorder.clone(), facing);
        recorder.manager.set(Arc::downgrade(&manager)).unwrap();
        let queue = FrameQueue::new(OutputSize::new(640, 480), PixelFormat::Gray8, 2);

        Self {
            platform,
            recorder,
            manager,
            queue,
        }
    }

    fn two_cameras() -> Self {
        Self::new(
            vec![
                VirtualCamera::new("camA", CameraFacing::Front),
                VirtualCamera::new("camB", CameraFacing::Back).with_sensor_orientation(SensorRotation::Rotate90),
            ],
            CameraFacing::Back,
        )
    }

    fn start(&self) -> Option<u64> {
        let output: Arc<dyn FrameSink> = self.queue.clone();
        self.manager.start(vec![output])
    }

    fn dispatch(&self) -> usize {
        self.platform.dispatch_pending()
    }
}

#[test]
fn test_start_reaches_streaming() {
    let h = Harness::two_cameras();

    h.start();
    assert_eq!(h.manager.phase(), SessionPhase::Opening);
    // Nothing is delivered inside start()
    assert!(h.recorder.events().is_empty());

    h.dispatch();
    assert_eq!(h.manager.phase(), SessionPhase::Streaming);
    assert!(h.manager.session_id().is_some());
    assert_eq!(
        h.recorder.events(),
        vec![Seen::Ready("camB".into()), Seen::Streaming("camB".into())]
    );
    assert!(h.platform.is_streaming("camB"));

    let stats = h.platform.handle_stats();
    assert_eq!((stats.opened, stats.closed, stats.requests), (1, 0, 1));
}

#[test]
fn test_frames_flow_into_queue() {
    let h = Harness::two_cameras();
    h.start();
    h.dispatch();

    assert_eq!(h.platform.emit_frame("camB", RawImage::gray8(2, 2, vec![7; 4])), 1);
    assert_eq!(h.queue.pending(), 1);
    // Other camera is not streaming
    assert_eq!(h.platform.emit_frame("camA", RawImage::gray8(2, 2, vec![7; 4])), 0);
}

#[test]
fn test_start_is_noop_unless_closed() {
    let h = Harness::two_cameras();
    let generation = h.start();
    assert_eq!(generation, Some(h.manager.generation()));
    assert_eq!(h.start(), None);
    h.dispatch();
    assert_eq!(h.start(), None);

    assert_eq!(h.platform.handle_stats().opened, 1);
    assert_eq!(h.platform.handle_stats().max_live, 1);
}

#[test]
fn test_release_twice_leaves_no_handle() {
    let h = Harness::two_cameras();
    let started = h.start().unwrap();
    h.dispatch();

    let first = h.manager.release();
    let second = h.manager.release();
    assert!(started < first && first < second);
    assert_eq!(second, h.manager.generation());

    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    assert!(h.manager.session_id().is_none());
    assert_eq!(h.platform.handle_stats().live(), 0);
    assert_eq!(h.platform.handle_stats().closed, 1);
    assert!(!h.platform.is_streaming("camB"));
}

#[test]
fn test_release_while_opening_closes_late_handle() {
    let h = Harness::two_cameras();
    h.start();
    h.manager.release();
    assert_eq!(h.manager.phase(), SessionPhase::Closed);

    // The open completes after release: handle must be closed on arrival
    h.dispatch();
    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    let stats = h.platform.handle_stats();
    assert_eq!((stats.opened, stats.closed), (1, 1));
    assert!(h.recorder.events().is_empty());
}

#[test]
fn test_restart_after_release_ignores_stale_open() {
    let h = Harness::two_cameras();
    h.start();
    h.manager.release();
    h.start();

    h.dispatch();
    assert_eq!(h.manager.phase(), SessionPhase::Streaming);
    let stats = h.platform.handle_stats();
    assert_eq!(stats.opened, 2);
    assert_eq!(stats.live(), 1);
    assert!(h.recorder.errors().is_empty());
}

#[test]
fn test_release_from_ready_callback() {
    let h = Harness::two_cameras();
    *h.recorder.release_on_ready.lock().unwrap() = true;

    h.start();
    h.dispatch();

    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    let stats = h.platform.handle_stats();
    assert_eq!(stats.live(), 0);
    assert_eq!(stats.requests, 0);
}

#[test]
fn test_disconnect_is_silent() {
    let h = Harness::two_cameras();
    h.start();
    h.dispatch();

    h.platform.disconnect("camB");
    h.dispatch();

    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    assert!(h.recorder.errors().is_empty());
    assert_eq!(h.platform.handle_stats().live(), 0);

    // A second release after the disconnect is harmless
    h.manager.release();
    assert_eq!(h.platform.handle_stats().closed, 1);
}

#[test]
fn test_runtime_device_error_is_reported() {
    let h = Harness::two_cameras();
    h.start();
    h.dispatch();

    h.platform.fail_device("camB", PlatformErrorCode::CAMERA_DEVICE);
    h.dispatch();

    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    assert_eq!(h.recorder.errors(), vec![CameraError::CameraDeviceError]);
    assert_eq!(h.platform.handle_stats().live(), 0);
}

#[test]
fn test_open_error_codes_are_mapped() {
    let cases = [
        (PlatformErrorCode::CAMERA_IN_USE, CameraError::CameraInUse),
        (PlatformErrorCode::MAX_CAMERAS_IN_USE, CameraError::MaxCamerasInUse),
        (PlatformErrorCode::CAMERA_DISABLED, CameraError::CameraDisabled),
        (PlatformErrorCode::CAMERA_DEVICE, CameraError::CameraDeviceError),
        (PlatformErrorCode::CAMERA_SERVICE, CameraError::CameraServiceError),
        (PlatformErrorCode(99), CameraError::Generic(99)),
    ];

    for (code, expected) in cases {
        let h = Harness::two_cameras();
        h.platform.set_faults(
            "camB",
            FaultPlan {
                open_error: Some(code),
                ..FaultPlan::default()
            },
        );

        h.start();
        h.dispatch();

        assert_eq!(h.manager.phase(), SessionPhase::Closed);
        assert_eq!(h.recorder.errors(), vec![expected]);
        assert_eq!(h.platform.handle_stats().opened, 0);
    }
}

#[test]
fn test_synchronous_open_refusal() {
    let h = Harness::two_cameras();
    h.platform.set_faults(
        "camB",
        FaultPlan {
            refuse_open: Some(PlatformErrorCode::CAMERA_IN_USE),
            ..FaultPlan::default()
        },
    );

    h.start();
    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    assert_eq!(h.recorder.errors(), vec![CameraError::CameraInUse]);
    assert_eq!(h.platform.pending_events(), 0);
}

#[test]
fn test_session_refusal_is_access_denied() {
    let h = Harness::two_cameras();
    h.platform.set_faults(
        "camB",
        FaultPlan {
            refuse_session: true,
            ..FaultPlan::default()
        },
    );

    h.start();
    h.dispatch();

    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    assert!(matches!(
        h.recorder.errors().as_slice(),
        [CameraError::CameraAccessDenied(_)]
    ));
    assert_eq!(h.platform.handle_stats().live(), 0);
}

#[test]
fn test_configure_failure() {
    let h = Harness::two_cameras();
    h.platform.set_faults(
        "camB",
        FaultPlan {
            configure_fails: true,
            ..FaultPlan::default()
        },
    );

    h.start();
    h.dispatch();

    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    assert_eq!(h.recorder.errors(), vec![CameraError::SessionConfigurationFailed]);
    assert_eq!(h.platform.handle_stats().live(), 0);
}

#[test]
fn test_request_refusal_is_access_denied() {
    let h = Harness::two_cameras();
    h.platform.set_faults(
        "camB",
        FaultPlan {
            refuse_request: true,
            ..FaultPlan::default()
        },
    );

    h.start();
    h.dispatch();

    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    assert!(matches!(
        h.recorder.errors().as_slice(),
        [CameraError::CameraAccessDenied(_)]
    ));
    let stats = h.platform.handle_stats();
    assert_eq!((stats.live(), stats.requests), (0, 0));
}

#[test]
fn test_stalled_open_waits_for_release() {
    let h = Harness::two_cameras();
    h.platform.set_faults(
        "camB",
        FaultPlan {
            stall_open: true,
            ..FaultPlan::default()
        },
    );

    h.start();
    assert_eq!(h.dispatch(), 0);
    assert_eq!(h.manager.phase(), SessionPhase::Opening);

    h.manager.release();
    assert_eq!(h.manager.phase(), SessionPhase::Closed);
}

#[test]
fn test_no_camera_available() {
    let h = Harness::new(Vec::new(), CameraFacing::Back);
    h.start();

    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    assert_eq!(h.recorder.errors(), vec![CameraError::NoCameraAvailable]);
    assert_eq!(h.manager.camera_facing(), None);
    assert_eq!(h.manager.sensor_orientation(), None);
    assert_eq!(h.manager.output_size(100), None);
}

#[test]
fn test_queries_follow_selection_when_closed() {
    let h = Harness::two_cameras();

    assert_eq!(h.manager.camera_facing(), Some(CameraFacing::Back));
    assert_eq!(h.manager.sensor_orientation(), Some(SensorRotation::Rotate90));

    h.manager.set_camera_facing(CameraFacing::Front);
    assert_eq!(h.manager.camera_facing(), Some(CameraFacing::Front));
    assert_eq!(h.manager.sensor_orientation(), Some(SensorRotation::None));

    // Default virtual sizes: 640x480, 1280x720, 1920x1080
    assert_eq!(h.manager.output_size(700), Some(OutputSize::new(1280, 720)));
    assert_eq!(h.manager.output_size(5000), Some(OutputSize::new(1920, 1080)));
}

#[test]
fn test_facing_fallback_opens_first_camera() {
    let h = Harness::new(vec![VirtualCamera::new("camA", CameraFacing::Front)], CameraFacing::Back);
    h.start();
    h.dispatch();

    assert_eq!(
        h.recorder.events(),
        vec![Seen::Ready("camA".into()), Seen::Streaming("camA".into())]
    );
}

#[test]
fn test_removed_camera_disconnects() {
    let h = Harness::two_cameras();
    h.start();
    h.dispatch();

    h.platform.remove_camera("camB");
    h.dispatch();

    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    assert!(h.recorder.errors().is_empty());
    // Selection now falls back to the remaining camera
    assert_eq!(h.manager.camera_facing(), Some(CameraFacing::Front));
}

#[test]
fn test_dropping_manager_closes_late_handle() {
    let h = Harness::two_cameras();
    h.start();

    let Harness {
        platform,
        manager,
        recorder,
        queue: _,
    } = h;
    drop(manager);
    drop(recorder);

    platform.dispatch_pending();
    let stats = platform.handle_stats();
    assert_eq!((stats.opened, stats.closed), (1, 1));
}

#[test]
fn test_concurrent_starts_accept_exactly_one() {
    for _ in 0..200 {
        let h = Harness::two_cameras();
        let barrier = Barrier::new(2);

        let accepted: Vec<Option<u64>> = std::thread::scope(|scope| {
            let starters: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        h.start()
                    })
                })
                .collect();
            starters.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(accepted.iter().filter(|g| g.is_some()).count(), 1);
        h.dispatch();
        assert_eq!(h.manager.phase(), SessionPhase::Streaming);
        assert_eq!(h.platform.handle_stats().opened, 1);
        h.manager.release();
    }
}

#[test]
fn test_start_release_race_with_platform_thread() {
    let h = Harness::two_cameras();
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut round = 0u32;
            while !done.load(Ordering::SeqCst) {
                h.dispatch();
                h.platform.emit_frame("camB", RawImage::gray8(4, 4, vec![0; 16]));
                round += 1;
                if round % 5 == 0 {
                    h.platform.disconnect("camB");
                }
                std::thread::yield_now();
            }
        });
        scope.spawn(|| {
            for _ in 0..300 {
                h.start();
                std::thread::yield_now();
            }
        });

        for i in 0..500 {
            h.start();
            if i % 3 == 0 {
                h.dispatch();
            }
            h.manager.release();
        }
        done.store(true, Ordering::SeqCst);
    });

    h.manager.release();
    // Late opens arrive after the final release and must be closed on delivery
    h.dispatch();

    assert_eq!(h.manager.phase(), SessionPhase::Closed);
    assert_eq!(h.platform.pending_events(), 0);
    assert_eq!(h.platform.handle_stats().live(), 0);
    assert_eq!(h.queue.outstanding(), 0);
}
