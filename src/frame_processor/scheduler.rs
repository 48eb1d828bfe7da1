// SPDX-License-Identifier: GPL-3.0-only

//! Frame intake scheduler
//!
//! Sits between the frame queue and the detector. Every image-available
//! signal pulls the newest frame and either forwards it for detection or
//! drops it. At most one frame is with the detector at any time; frames that
//! arrive meanwhile are released straight back to the queue, never queued.
//!
//! Every acquired frame is released exactly once: dropped frames right away,
//! forwarded frames when the detector future completes (or is torn down with
//! the runtime).

use super::rotation::rotation_compensation;
use super::tasks::Detector;
use super::types::{Detection, FrameMetadata, ScanResult};
use crate::backends::camera::types::{CameraFacing, DeviceRotation, SensorRotation};
use crate::backends::camera::FrameQueue;
use crate::constants::STATS_LOG_INTERVAL;
use crate::errors::{DetectorError, FrameError};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

/// Read access to the camera currently feeding the scheduler
pub trait CameraInfo: Send + Sync {
    /// Facing of the open (or currently resolvable) camera
    fn camera_facing(&self) -> Option<CameraFacing>;

    /// Mounting angle of that camera's sensor
    fn sensor_orientation(&self) -> Option<SensorRotation>;
}

/// Caller-visible scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// Frames are dropped until resumed
    Paused,
    /// A frame is with the detector
    Busy,
}

/// Why a frame was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Paused,
    /// Our own frame is still being processed
    Busy,
    /// The detector asked not to be fed
    DetectorBusy,
}

/// What happened to one image-available signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// The queue had nothing to hand out
    NoFrame,
    Dropped(DropReason),
    Forwarded,
}

/// Snapshot of the scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frames acquired from the queue
    pub frames: u64,
    pub forwarded: u64,
    pub dropped_paused: u64,
    pub dropped_busy: u64,
    /// Frames refused because no camera facing could be resolved
    pub camera_not_open: u64,
    pub detector_failures: u64,
    /// Total barcodes reported to listeners
    pub detections: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    forwarded: AtomicU64,
    dropped_paused: AtomicU64,
    dropped_busy: AtomicU64,
    camera_not_open: AtomicU64,
    detector_failures: AtomicU64,
    detections: AtomicU64,
}

/// Receives every non-empty scan result
pub type ResultListener = Arc<dyn Fn(&ScanResult) + Send + Sync>;

/// Registration handle returned by [`FrameScheduler::add_result_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Backpressure gate in front of a [`Detector`]
pub struct FrameScheduler {
    detector: Arc<dyn Detector>,
    camera: Arc<dyn CameraInfo>,
    runtime: tokio::runtime::Handle,
    paused: AtomicBool,
    in_flight: AtomicBool,
    device_rotation: AtomicU32,
    listeners: Mutex<Vec<(ListenerId, ResultListener)>>,
    next_listener: AtomicU64,
    counters: Counters,
}

/// Clears the in-flight flag when the detection task ends, however it ends
struct InFlightGuard {
    scheduler: Arc<FrameScheduler>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.scheduler.in_flight.store(false, Ordering::Release);
    }
}

impl FrameScheduler {
    /// Create a scheduler spawning detection work on `runtime`
    pub fn new(
        detector: Arc<dyn Detector>,
        camera: Arc<dyn CameraInfo>,
        runtime: tokio::runtime::Handle,
    ) -> Arc<Self> {
        info!(detector = detector.name(), "Creating frame scheduler");

        Arc::new(Self {
            detector,
            camera,
            runtime,
            paused: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            device_rotation: AtomicU32::new(DeviceRotation::default().degrees()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            counters: Counters::default(),
        })
    }

    /// Drop every following frame until [`resume`](Self::resume)
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            debug!("Frame scheduler paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            debug!("Frame scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Whether a frame is currently with the detector
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Paused wins over busy
    pub fn state(&self) -> SchedulerState {
        if self.is_paused() {
            SchedulerState::Paused
        } else if self.in_flight() {
            SchedulerState::Busy
        } else {
            SchedulerState::Idle
        }
    }

    pub fn set_device_rotation(&self, rotation: DeviceRotation) {
        self.device_rotation.store(rotation.degrees(), Ordering::Relaxed);
    }

    pub fn device_rotation(&self) -> DeviceRotation {
        DeviceRotation::from_degrees(self.device_rotation.load(Ordering::Relaxed))
    }

    pub fn add_result_listener(&self, listener: ResultListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, listener));
        id
    }

    /// Unregister a listener; returns false if it was already gone
    pub fn remove_result_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub fn result_listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.counters;
        SchedulerStats {
            frames: c.frames.load(Ordering::Relaxed),
            forwarded: c.forwarded.load(Ordering::Relaxed),
            dropped_paused: c.dropped_paused.load(Ordering::Relaxed),
            dropped_busy: c.dropped_busy.load(Ordering::Relaxed),
            camera_not_open: c.camera_not_open.load(Ordering::Relaxed),
            detector_failures: c.detector_failures.load(Ordering::Relaxed),
            detections: c.detections.load(Ordering::Relaxed),
        }
    }

    /// Handle one image-available signal from `queue`
    ///
    /// Returns `Err(FrameError::CameraNotOpen)` when a frame arrives but no
    /// camera facing can be resolved; the frame is released first.
    pub fn on_image_available(self: &Arc<Self>, queue: &Arc<FrameQueue>) -> Result<FrameDisposition, FrameError> {
        let Some(frame) = queue.acquire_latest() else {
            return Ok(FrameDisposition::NoFrame);
        };

        let total = self.counters.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if total % STATS_LOG_INTERVAL == 0 {
            let stats = self.stats();
            debug!(
                frames = stats.frames,
                forwarded = stats.forwarded,
                dropped_paused = stats.dropped_paused,
                dropped_busy = stats.dropped_busy,
                detector_failures = stats.detector_failures,
                detections = stats.detections,
                "Frame scheduler stats"
            );
        }

        if self.is_paused() {
            frame.release();
            self.counters.dropped_paused.fetch_add(1, Ordering::Relaxed);
            return Ok(FrameDisposition::Dropped(DropReason::Paused));
        }

        if self.detector.is_busy() {
            frame.release();
            self.counters.dropped_busy.fetch_add(1, Ordering::Relaxed);
            return Ok(FrameDisposition::Dropped(DropReason::DetectorBusy));
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!(sequence = frame.sequence(), "Detector busy, dropping frame");
            frame.release();
            self.counters.dropped_busy.fetch_add(1, Ordering::Relaxed);
            return Ok(FrameDisposition::Dropped(DropReason::Busy));
        }
        let guard = InFlightGuard {
            scheduler: Arc::clone(self),
        };

        let Some(facing) = self.camera.camera_facing() else {
            frame.release();
            drop(guard);
            self.counters.camera_not_open.fetch_add(1, Ordering::Relaxed);
            return Err(FrameError::CameraNotOpen);
        };

        let metadata = FrameMetadata {
            width: frame.width(),
            height: frame.height(),
            rotation: rotation_compensation(self.device_rotation(), self.camera.sensor_orientation()),
            facing,
        };
        self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
        trace!(
            sequence = frame.sequence(),
            width = metadata.width,
            height = metadata.height,
            rotation = %metadata.rotation,
            "Forwarding frame to detector"
        );

        let scheduler = Arc::clone(self);
        self.runtime.spawn(async move {
            let sequence = frame.sequence();
            let result = scheduler.detector.detect(&frame, &metadata).await;
            frame.release();
            drop(guard);
            scheduler.finish(sequence, metadata, result);
        });

        Ok(FrameDisposition::Forwarded)
    }

    fn finish(&self, sequence: u64, metadata: FrameMetadata, result: Result<Vec<Detection>, DetectorError>) {
        let detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                self.counters.detector_failures.fetch_add(1, Ordering::Relaxed);
                warn!(sequence, detector = self.detector.name(), error = %e, "Detection failed");
                return;
            }
        };

        if detections.is_empty() {
            return;
        }

        self.counters
            .detections
            .fetch_add(detections.len() as u64, Ordering::Relaxed);
        debug!(sequence, count = detections.len(), "Barcodes detected");

        let result = ScanResult {
            sequence,
            metadata,
            detections,
        };
        // Listeners may call back into the scheduler
        let listeners: Vec<ResultListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&result);
        }
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("detector", &self.detector.name())
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{OutputSize, PixelFormat, RawImage};
    use crate::backends::camera::{Frame, FrameSink};
    use crate::frame_processor::types::{BarcodeFormat, FrameRegion};
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FixedCamera(Option<CameraFacing>);

    impl CameraInfo for FixedCamera {
        fn camera_facing(&self) -> Option<CameraFacing> {
            self.0
        }

        fn sensor_orientation(&self) -> Option<SensorRotation> {
            self.0.map(|_| SensorRotation::Rotate90)
        }
    }

    /// Holds each frame until a permit is added
    struct GatedDetector {
        calls: AtomicUsize,
        gate: tokio::sync::Semaphore,
        busy: AtomicBool,
        seen: Mutex<Vec<FrameMetadata>>,
    }

    impl GatedDetector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: tokio::sync::Semaphore::new(0),
                busy: AtomicBool::new(false),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Detector for GatedDetector {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn detect<'a>(
            &'a self,
            _frame: &'a Frame,
            metadata: &'a FrameMetadata,
        ) -> BoxFuture<'a, Result<Vec<Detection>, DetectorError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.seen).push(*metadata);
            Box::pin(async move {
                if let Ok(permit) = self.gate.acquire().await {
                    permit.forget();
                }
                Ok(vec![Detection {
                    format: BarcodeFormat::QrCode,
                    content: "hello".into(),
                    bounds: FrameRegion::from_pixels(0, 0, 2, 1, 4, 2),
                }])
            })
        }

        fn is_busy(&self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }
    }

    fn queue() -> Arc<FrameQueue> {
        FrameQueue::new(OutputSize::new(4, 2), PixelFormat::Gray8, 2)
    }

    fn push(queue: &Arc<FrameQueue>) {
        Arc::clone(queue).submit(RawImage::gray8(4, 2, vec![0; 8]));
    }

    async fn wait_idle(scheduler: &FrameScheduler) {
        for _ in 0..200 {
            if !scheduler.in_flight() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("detection never finished");
    }

    #[tokio::test]
    async fn test_empty_queue_is_no_frame() {
        let detector = GatedDetector::new();
        let scheduler = FrameScheduler::new(
            detector.clone(),
            Arc::new(FixedCamera(Some(CameraFacing::Back))),
            tokio::runtime::Handle::current(),
        );

        assert_eq!(scheduler.on_image_available(&queue()), Ok(FrameDisposition::NoFrame));
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_busy_drops_and_releases() {
        let detector = GatedDetector::new();
        let scheduler = FrameScheduler::new(
            detector.clone(),
            Arc::new(FixedCamera(Some(CameraFacing::Back))),
            tokio::runtime::Handle::current(),
        );
        let queue = queue();

        push(&queue);
        assert_eq!(scheduler.on_image_available(&queue), Ok(FrameDisposition::Forwarded));
        assert_eq!(scheduler.state(), SchedulerState::Busy);

        push(&queue);
        assert_eq!(
            scheduler.on_image_available(&queue),
            Ok(FrameDisposition::Dropped(DropReason::Busy))
        );
        assert_eq!(queue.outstanding(), 1);

        detector.gate.add_permits(1);
        wait_idle(&scheduler).await;

        assert_eq!(queue.outstanding(), 0);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        let stats = scheduler.stats();
        assert_eq!((stats.forwarded, stats.dropped_busy), (1, 1));
    }

    #[tokio::test]
    async fn test_paused_never_calls_detector() {
        let detector = GatedDetector::new();
        let scheduler = FrameScheduler::new(
            detector.clone(),
            Arc::new(FixedCamera(Some(CameraFacing::Back))),
            tokio::runtime::Handle::current(),
        );
        let queue = queue();
        scheduler.pause();

        for _ in 0..5 {
            push(&queue);
            assert_eq!(
                scheduler.on_image_available(&queue),
                Ok(FrameDisposition::Dropped(DropReason::Paused))
            );
        }
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.outstanding(), 0);

        scheduler.resume();
        push(&queue);
        assert_eq!(scheduler.on_image_available(&queue), Ok(FrameDisposition::Forwarded));
        detector.gate.add_permits(1);
        wait_idle(&scheduler).await;
    }

    #[tokio::test]
    async fn test_paused_reported_over_busy() {
        let detector = GatedDetector::new();
        let scheduler = FrameScheduler::new(
            detector.clone(),
            Arc::new(FixedCamera(Some(CameraFacing::Back))),
            tokio::runtime::Handle::current(),
        );
        let queue = queue();

        push(&queue);
        scheduler.on_image_available(&queue).unwrap();
        scheduler.pause();
        assert_eq!(scheduler.state(), SchedulerState::Paused);

        detector.gate.add_permits(1);
        wait_idle(&scheduler).await;
        assert_eq!(scheduler.state(), SchedulerState::Paused);
    }

    #[tokio::test]
    async fn test_detector_busy_drops() {
        let detector = GatedDetector::new();
        detector.busy.store(true, Ordering::SeqCst);
        let scheduler = FrameScheduler::new(
            detector.clone(),
            Arc::new(FixedCamera(Some(CameraFacing::Back))),
            tokio::runtime::Handle::current(),
        );
        let queue = queue();

        push(&queue);
        assert_eq!(
            scheduler.on_image_available(&queue),
            Ok(FrameDisposition::Dropped(DropReason::DetectorBusy))
        );
        assert_eq!(queue.outstanding(), 0);
        assert!(!scheduler.in_flight());
    }

    #[tokio::test]
    async fn test_no_camera_is_error_not_drop() {
        let detector = GatedDetector::new();
        let scheduler = FrameScheduler::new(
            detector.clone(),
            Arc::new(FixedCamera(None)),
            tokio::runtime::Handle::current(),
        );
        let queue = queue();

        push(&queue);
        assert_eq!(scheduler.on_image_available(&queue), Err(FrameError::CameraNotOpen));
        assert_eq!(queue.outstanding(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.stats().camera_not_open, 1);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_metadata_and_listener() {
        let detector = GatedDetector::new();
        let scheduler = FrameScheduler::new(
            detector.clone(),
            Arc::new(FixedCamera(Some(CameraFacing::Front))),
            tokio::runtime::Handle::current(),
        );
        scheduler.set_device_rotation(DeviceRotation::Rotation90);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        scheduler.add_result_listener(Arc::new(move |result: &ScanResult| {
            lock(&sink).push(result.detections.len());
        }));

        let queue = queue();
        push(&queue);
        scheduler.on_image_available(&queue).unwrap();
        detector.gate.add_permits(1);
        wait_idle(&scheduler).await;
        // Listener runs after the busy flag is cleared
        for _ in 0..200 {
            if !lock(&received).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let seen = lock(&detector.seen).clone();
        assert_eq!(
            seen,
            vec![FrameMetadata {
                width: 4,
                height: 2,
                rotation: SensorRotation::None,
                facing: CameraFacing::Front,
            }]
        );
        assert_eq!(*lock(&received), vec![1]);
        assert_eq!(scheduler.stats().detections, 1);
    }

    #[tokio::test]
    async fn test_removed_listener_is_not_called() {
        let detector = GatedDetector::new();
        let scheduler = FrameScheduler::new(
            detector.clone(),
            Arc::new(FixedCamera(Some(CameraFacing::Back))),
            tokio::runtime::Handle::current(),
        );

        let kept = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));
        let kept_count = Arc::clone(&kept);
        let removed_count = Arc::clone(&removed);
        scheduler.add_result_listener(Arc::new(move |_: &ScanResult| {
            kept_count.fetch_add(1, Ordering::SeqCst);
        }));
        let id = scheduler.add_result_listener(Arc::new(move |_: &ScanResult| {
            removed_count.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(scheduler.remove_result_listener(id));
        assert!(!scheduler.remove_result_listener(id));
        assert_eq!(scheduler.result_listener_count(), 1);

        let queue = queue();
        push(&queue);
        scheduler.on_image_available(&queue).unwrap();
        detector.gate.add_permits(1);
        for _ in 0..200 {
            if kept.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(kept.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_runtime_shutdown_releases_frame() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let detector = GatedDetector::new();
        let scheduler = FrameScheduler::new(
            detector,
            Arc::new(FixedCamera(Some(CameraFacing::Back))),
            runtime.handle().clone(),
        );
        let queue = queue();

        push(&queue);
        assert_eq!(scheduler.on_image_available(&queue), Ok(FrameDisposition::Forwarded));
        assert_eq!(queue.outstanding(), 1);

        drop(runtime);
        assert_eq!(queue.outstanding(), 0);
        assert!(!scheduler.in_flight());
    }
}
