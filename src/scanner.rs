// SPDX-License-Identifier: GPL-3.0-only

//! Barcode scanner facade
//!
//! Wires the session manager, a frame queue sized for the enabled barcode
//! formats, and the frame scheduler into one caller-facing object.
//!
//! ```text
//! CameraPlatform ──▶ CameraSessionManager ──▶ FrameQueue ──▶ FrameScheduler ──▶ Detector
//!                          │                                        │
//!                          ▼                                        ▼
//!                   error listeners                         result listeners / detections()
//! ```

use crate::backends::camera::frame_queue::FrameQueueStats;
use crate::backends::camera::selection::min_width_for_barcodes;
use crate::backends::camera::{
    CameraFacing, CameraPlatform, CameraSessionManager, DeviceRotation, FrameQueue, FrameSink, PixelFormat,
    SessionObserver, SessionPhase,
};
use crate::config::Config;
use crate::errors::{CameraError, FrameError};
use crate::frame_processor::scheduler::{FrameScheduler, ListenerId, ResultListener, SchedulerState, SchedulerStats};
use crate::frame_processor::tasks::{Detector, QrDetector};
use crate::frame_processor::types::{BarcodeFormat, ScanResult};
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, trace, warn};

/// Receives every camera error the scanner reports
pub type ErrorListener = Arc<dyn Fn(&CameraError) + Send + Sync>;

/// Settings that shape each session start
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerSettings {
    pub camera_facing: CameraFacing,
    pub formats: Vec<BarcodeFormat>,
    pub format_min_widths: BTreeMap<BarcodeFormat, u32>,
    pub screen_proportion: f64,
    pub custom_min_width: Option<u32>,
    pub max_images: usize,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ScannerSettings {
    fn from(config: &Config) -> Self {
        Self {
            camera_facing: config.camera_facing,
            formats: config.formats.clone(),
            format_min_widths: config.format_min_widths.clone(),
            screen_proportion: config.screen_proportion,
            custom_min_width: config.custom_min_width,
            max_images: config.max_images,
        }
    }
}

impl ScannerSettings {
    /// Minimum capture width for these settings
    pub fn min_width(&self) -> u32 {
        min_width_for_barcodes(
            &self.format_min_widths,
            &self.formats,
            self.screen_proportion,
            self.custom_min_width,
        )
    }
}

/// Fans manager notifications out to the registered error listeners
#[derive(Default)]
struct ListenerHub {
    error_listeners: Mutex<Vec<ErrorListener>>,
}

impl ListenerHub {
    fn report(&self, error: CameraError) {
        warn!(error = %error, "Camera error");
        let listeners = lock(&self.error_listeners).clone();
        for listener in listeners {
            listener(&error);
        }
    }
}

impl SessionObserver for ListenerHub {
    fn on_camera_ready(&self, camera_id: &str) {
        info!(camera_id, "Camera ready");
    }

    fn on_streaming(&self, camera_id: &str) {
        info!(camera_id, "Camera streaming");
    }

    fn on_error(&self, error: CameraError) {
        self.report(error);
    }
}

/// Frame queue the manager streams into, tagged with the start that installed it
#[derive(Default)]
struct ActiveQueue {
    generation: u64,
    queue: Option<Arc<FrameQueue>>,
}

/// Unregisters a `detections()` listener when its stream is dropped
struct StreamRegistration {
    scheduler: Weak<FrameScheduler>,
    id: ListenerId,
}

impl Drop for StreamRegistration {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.remove_result_listener(self.id);
            trace!("Detection stream listener removed");
        }
    }
}

/// Live barcode scanner over one camera platform
pub struct BarcodeScanner {
    manager: Arc<CameraSessionManager>,
    scheduler: Arc<FrameScheduler>,
    hub: Arc<ListenerHub>,
    settings: Mutex<ScannerSettings>,
    active: Mutex<ActiveQueue>,
}

impl BarcodeScanner {
    /// Create a scanner; detection work is spawned on `runtime`
    pub fn new(
        platform: Arc<dyn CameraPlatform>,
        detector: Arc<dyn Detector>,
        settings: ScannerSettings,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let hub = Arc::new(ListenerHub::default());
        let manager = CameraSessionManager::new(platform, hub.clone(), settings.camera_facing);
        let scheduler = FrameScheduler::new(detector, manager.clone(), runtime);

        Self {
            manager,
            scheduler,
            hub,
            settings: Mutex::new(settings),
            active: Mutex::new(ActiveQueue::default()),
        }
    }

    /// Scanner with a QR detector configured from `config`
    pub fn from_config(config: &Config, platform: Arc<dyn CameraPlatform>, runtime: tokio::runtime::Handle) -> Self {
        let detector = Arc::new(QrDetector::with_max_dimension(config.qr_max_dimension));
        Self::new(platform, detector, ScannerSettings::from(config), runtime)
    }

    /// Open the camera and start streaming into a fresh frame queue
    ///
    /// Does nothing unless the camera is closed. Errors arrive through the
    /// error listeners. Concurrent callers race on the manager: only the
    /// start it accepts installs its queue.
    pub fn start(&self) {
        if self.manager.phase() != SessionPhase::Closed {
            debug!(phase = ?self.manager.phase(), "Scanner already started");
            return;
        }

        let settings = lock(&self.settings).clone();
        let min_width = settings.min_width();

        let Some(size) = self.manager.output_size(min_width) else {
            if self.manager.camera_characteristics().is_none() {
                self.hub.report(CameraError::NoCameraAvailable);
            } else {
                warn!(min_width, "Camera reports no output sizes");
                self.hub.report(CameraError::SessionConfigurationFailed);
            }
            return;
        };
        info!(min_width, %size, "Starting barcode scanner");

        let queue = FrameQueue::new(size, PixelFormat::Gray8, settings.max_images);
        let scheduler = Arc::downgrade(&self.scheduler);
        queue.set_listener(Some(Arc::new(move |queue: &Arc<FrameQueue>| {
            let Some(scheduler) = scheduler.upgrade() else {
                return;
            };
            if let Err(FrameError::CameraNotOpen) = scheduler.on_image_available(queue) {
                error!("Frame arrived with no camera open");
            }
        })));

        let output: Arc<dyn FrameSink> = queue.clone();
        let Some(generation) = self.manager.start(vec![output]) else {
            debug!("Start not accepted, discarding frame queue");
            queue.set_listener(None);
            return;
        };

        let detached = {
            let mut active = lock(&self.active);
            if generation < active.generation {
                // A later release or start already superseded this one
                Some(queue)
            } else {
                active.generation = generation;
                active.queue.replace(queue)
            }
        };
        if let Some(detached) = detached {
            detached.set_listener(None);
        }
    }

    /// Close the camera; safe to call repeatedly and from any listener
    pub fn release(&self) {
        let released = self.manager.release();

        let queue = {
            let mut active = lock(&self.active);
            if active.generation > released {
                // Queue of a start accepted after this release
                None
            } else {
                active.generation = released;
                active.queue.take()
            }
        };
        if let Some(queue) = queue {
            queue.set_listener(None);
        }
    }

    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    /// Switch cameras; a running camera is restarted on the new facing
    pub fn set_camera_facing(&self, facing: CameraFacing) {
        lock(&self.settings).camera_facing = facing;
        self.manager.set_camera_facing(facing);

        if self.manager.phase() != SessionPhase::Closed {
            info!(facing = %facing, "Restarting scanner on new camera facing");
            self.release();
            self.start();
        }
    }

    /// Override the computed minimum capture width; takes effect on the next start
    pub fn set_min_barcode_width(&self, width: Option<u32>) {
        lock(&self.settings).custom_min_width = width;
    }

    pub fn set_device_rotation(&self, rotation: DeviceRotation) {
        self.scheduler.set_device_rotation(rotation);
    }

    pub fn add_error_listener(&self, listener: ErrorListener) {
        lock(&self.hub.error_listeners).push(listener);
    }

    pub fn add_result_listener(&self, listener: ResultListener) -> ListenerId {
        self.scheduler.add_result_listener(listener)
    }

    pub fn remove_result_listener(&self, id: ListenerId) -> bool {
        self.scheduler.remove_result_listener(id)
    }

    /// Stream of every non-empty scan result from now on
    ///
    /// The stream's listener is unregistered when the stream is dropped.
    pub fn detections(&self) -> BoxStream<'static, ScanResult> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let id = self.scheduler.add_result_listener(Arc::new(move |result: &ScanResult| {
            let _ = tx.send(result.clone());
        }));
        let registration = StreamRegistration {
            scheduler: Arc::downgrade(&self.scheduler),
            id,
        };

        Box::pin(async_stream::stream! {
            let _registration = registration;
            while let Some(result) = rx.recv().await {
                yield result;
            }
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn phase(&self) -> SessionPhase {
        self.manager.phase()
    }

    pub fn settings(&self) -> ScannerSettings {
        lock(&self.settings).clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Counters of the current frame queue, if started
    pub fn queue_stats(&self) -> Option<FrameQueueStats> {
        lock(&self.active).queue.as_ref().map(|queue| queue.stats())
    }

    pub fn manager(&self) -> &Arc<CameraSessionManager> {
        &self.manager
    }

    pub fn scheduler(&self) -> &Arc<FrameScheduler> {
        &self.scheduler
    }
}

impl Drop for BarcodeScanner {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for BarcodeScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarcodeScanner")
            .field("phase", &self.phase())
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
