// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera platform
//!
//! A scripted [`CameraPlatform`] without hardware. It serves two purposes:
//! driving the pipeline from image files, and acting as the camera double
//! in tests.
//!
//! # Event delivery
//!
//! ```text
//! open_camera / create_capture_session / disconnect / fail_device
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ Posted queue     │  ← callbacks are never run inside the call that
//! └──────────────────┘    registered them
//!        │ dispatch_pending() (tests, or the pump thread)
//!        ▼
//!   DeviceCallback / SessionCallback
//! ```
//!
//! Faults are injected per camera id through [`FaultPlan`]. Every handle
//! given out is counted so tests can check that handles are closed exactly
//! once and never more than one is live.

mod file_source;

pub use file_source::{FileFrameSource, collect_image_paths, load_image_as_frame};

use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction};
use crate::backends::camera::types::*;
use crate::backends::camera::{
    CameraDevice, CameraPlatform, CaptureSession, DeviceCallback, DeviceEvent, FrameSink, SessionCallback,
    SessionEvent,
};
use crate::constants::virtual_camera as vc;
use crate::errors::PlatformError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A camera the virtual platform reports
#[derive(Debug, Clone)]
pub struct VirtualCamera {
    pub id: String,
    pub facing: CameraFacing,
    pub sensor_orientation: SensorRotation,
    pub output_sizes: Vec<OutputSize>,
    pub autofocus_modes: Vec<AutoFocusMode>,
}

impl VirtualCamera {
    pub fn new(id: impl Into<String>, facing: CameraFacing) -> Self {
        Self {
            id: id.into(),
            facing,
            sensor_orientation: SensorRotation::None,
            output_sizes: vc::DEFAULT_SIZES.iter().map(|&(w, h)| OutputSize::new(w, h)).collect(),
            autofocus_modes: vec![AutoFocusMode::ContinuousPicture, AutoFocusMode::Auto, AutoFocusMode::Off],
        }
    }

    pub fn with_sensor_orientation(mut self, rotation: SensorRotation) -> Self {
        self.sensor_orientation = rotation;
        self
    }

    pub fn with_output_sizes(mut self, sizes: Vec<OutputSize>) -> Self {
        self.output_sizes = sizes;
        self
    }

    pub fn with_autofocus_modes(mut self, modes: Vec<AutoFocusMode>) -> Self {
        self.autofocus_modes = modes;
        self
    }

    fn characteristics(&self) -> CameraCharacteristics {
        CameraCharacteristics {
            id: self.id.clone(),
            facing: self.facing,
            sensor_orientation: self.sensor_orientation,
            output_sizes: self.output_sizes.clone(),
            autofocus_modes: self.autofocus_modes.clone(),
        }
    }
}

/// Faults injected for one camera id
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// `open_camera` fails synchronously with this code
    pub refuse_open: Option<PlatformErrorCode>,
    /// The open completes asynchronously with this error instead of a handle
    pub open_error: Option<PlatformErrorCode>,
    /// `create_capture_session` fails synchronously
    pub refuse_session: bool,
    /// Session configuration completes with `ConfigureFailed`
    pub configure_fails: bool,
    /// `set_repeating_request` fails
    pub refuse_request: bool,
    /// Open requests are accepted but never answered
    pub stall_open: bool,
}

/// Handle accounting for leak and exclusivity checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleStats {
    pub opened: u64,
    pub closed: u64,
    /// Largest number of handles open at the same time
    pub max_live: u64,
    /// Repeating requests accepted
    pub requests: u64,
}

impl HandleStats {
    pub fn live(&self) -> u64 {
        self.opened - self.closed
    }
}

enum Posted {
    Device {
        callback: Arc<Mutex<DeviceCallback>>,
        event: DeviceEvent,
    },
    Session {
        callback: SessionCallback,
        event: SessionEvent,
    },
}

struct OpenHandle {
    camera_id: String,
    callback: Arc<Mutex<DeviceCallback>>,
    /// Outputs of the running repeating request
    streaming: Option<Vec<Arc<dyn FrameSink>>>,
}

struct PlatformState {
    cameras: Vec<VirtualCamera>,
    faults: HashMap<String, FaultPlan>,
    queue: VecDeque<Posted>,
    handles: HashMap<u64, OpenHandle>,
    next_handle: u64,
    stats: HandleStats,
    source: Option<FileFrameSource>,
}

impl PlatformState {
    fn fault(&self, camera_id: &str) -> FaultPlan {
        self.faults.get(camera_id).cloned().unwrap_or_default()
    }
}

type SharedState = Arc<Mutex<PlatformState>>;

/// Scripted camera platform
pub struct VirtualPlatform {
    state: SharedState,
    pump: Mutex<Option<CaptureLoopController>>,
}

impl VirtualPlatform {
    pub fn new(cameras: Vec<VirtualCamera>) -> Self {
        info!(cameras = cameras.len(), "Creating virtual camera platform");
        Self {
            state: Arc::new(Mutex::new(PlatformState {
                cameras,
                faults: HashMap::new(),
                queue: VecDeque::new(),
                handles: HashMap::new(),
                next_handle: 1,
                stats: HandleStats::default(),
                source: None,
            })),
            pump: Mutex::new(None),
        }
    }

    /// Add a camera (hot plug)
    pub fn add_camera(&self, camera: VirtualCamera) {
        lock(&self.state).cameras.push(camera);
    }

    /// Remove a camera from the registry and disconnect its open handles
    pub fn remove_camera(&self, camera_id: &str) {
        lock(&self.state).cameras.retain(|camera| camera.id != camera_id);
        self.disconnect(camera_id);
    }

    /// Replace the fault plan of a camera
    pub fn set_faults(&self, camera_id: &str, plan: FaultPlan) {
        lock(&self.state).faults.insert(camera_id.to_string(), plan);
    }

    /// Use `source` for frames emitted by the pump
    pub fn set_frame_source(&self, source: FileFrameSource) {
        lock(&self.state).source = Some(source);
    }

    pub fn handle_stats(&self) -> HandleStats {
        lock(&self.state).stats
    }

    /// Callbacks posted and not yet delivered
    pub fn pending_events(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Whether any handle of `camera_id` has a running repeating request
    pub fn is_streaming(&self, camera_id: &str) -> bool {
        lock(&self.state)
            .handles
            .values()
            .any(|handle| handle.camera_id == camera_id && handle.streaming.is_some())
    }

    /// Post a disconnect to every open handle of `camera_id`
    ///
    /// Streaming stops immediately, like an unplugged device.
    pub fn disconnect(&self, camera_id: &str) {
        let mut state = lock(&self.state);
        let mut callbacks = Vec::new();
        for handle in state.handles.values_mut().filter(|h| h.camera_id == camera_id) {
            handle.streaming = None;
            callbacks.push(Arc::clone(&handle.callback));
        }

        info!(camera_id, handles = callbacks.len(), "Virtual camera disconnected");
        for callback in callbacks {
            state.queue.push_back(Posted::Device {
                callback,
                event: DeviceEvent::Disconnected,
            });
        }
    }

    /// Post a runtime device error to every open handle of `camera_id`
    pub fn fail_device(&self, camera_id: &str, code: PlatformErrorCode) {
        let mut state = lock(&self.state);
        let callbacks: Vec<_> = state
            .handles
            .values_mut()
            .filter(|h| h.camera_id == camera_id)
            .map(|handle| {
                handle.streaming = None;
                Arc::clone(&handle.callback)
            })
            .collect();

        warn!(camera_id, code = %code, "Injecting virtual device error");
        for callback in callbacks {
            state.queue.push_back(Posted::Device {
                callback,
                event: DeviceEvent::Error(code),
            });
        }
    }

    /// Deliver every posted callback, including ones posted while delivering
    ///
    /// Returns the number of callbacks run.
    pub fn dispatch_pending(&self) -> usize {
        dispatch(&self.state)
    }

    /// Submit `image` to every output streaming from `camera_id`
    ///
    /// Returns the number of outputs fed. Sinks run on the calling thread.
    pub fn emit_frame(&self, camera_id: &str, image: RawImage) -> usize {
        let sinks: Vec<Arc<dyn FrameSink>> = lock(&self.state)
            .handles
            .values()
            .filter(|handle| handle.camera_id == camera_id)
            .filter_map(|handle| handle.streaming.clone())
            .flatten()
            .collect();

        submit_all(sinks, image)
    }

    /// Run a pump thread that dispatches callbacks and streams the frame source
    pub fn start_pump(self: &Arc<Self>, interval: Duration) -> std::io::Result<()> {
        let mut pump = lock(&self.pump);
        if pump.is_some() {
            return Ok(());
        }

        let platform: Weak<VirtualPlatform> = Arc::downgrade(self);
        let controller = CaptureLoopController::start("virtual-pump", move || {
            let Some(platform) = platform.upgrade() else {
                return LoopAction::Stop;
            };

            platform.dispatch_pending();
            platform.pump_frame();
            drop(platform);

            std::thread::sleep(interval);
            LoopAction::Continue
        })?;

        *pump = Some(controller);
        Ok(())
    }

    /// Pump at the default virtual frame rate
    pub fn start_default_pump(self: &Arc<Self>) -> std::io::Result<()> {
        self.start_pump(vc::PUMP_INTERVAL)
    }

    pub fn stop_pump(&self) {
        let controller = lock(&self.pump).take();
        if let Some(mut controller) = controller {
            controller.stop();
        }
    }

    fn pump_frame(&self) {
        let (sinks, image) = {
            let mut state = lock(&self.state);
            let sinks: Vec<Arc<dyn FrameSink>> = state
                .handles
                .values()
                .filter_map(|handle| handle.streaming.clone())
                .flatten()
                .collect();
            if sinks.is_empty() {
                return;
            }
            let Some(image) = state.source.as_mut().and_then(FileFrameSource::next_frame) else {
                return;
            };
            (sinks, image)
        };

        submit_all(sinks, image);
    }
}

impl CameraPlatform for VirtualPlatform {
    fn camera_ids(&self) -> Result<Vec<String>, PlatformError> {
        Ok(lock(&self.state).cameras.iter().map(|camera| camera.id.clone()).collect())
    }

    fn characteristics(&self, camera_id: &str) -> Result<CameraCharacteristics, PlatformError> {
        lock(&self.state)
            .cameras
            .iter()
            .find(|camera| camera.id == camera_id)
            .map(VirtualCamera::characteristics)
            .ok_or_else(|| PlatformError::UnknownCamera(camera_id.to_string()))
    }

    fn open_camera(&self, camera_id: &str, callback: DeviceCallback) -> Result<(), PlatformError> {
        let mut state = lock(&self.state);

        if !state.cameras.iter().any(|camera| camera.id == camera_id) {
            return Err(PlatformError::UnknownCamera(camera_id.to_string()));
        }

        let fault = state.fault(camera_id);
        if let Some(code) = fault.refuse_open {
            debug!(camera_id, code = %code, "Refusing virtual open");
            return Err(PlatformError::Device(code));
        }

        let callback = Arc::new(Mutex::new(callback));

        if fault.stall_open {
            debug!(camera_id, "Stalling virtual open");
            return Ok(());
        }

        if let Some(code) = fault.open_error {
            state.queue.push_back(Posted::Device {
                callback,
                event: DeviceEvent::Error(code),
            });
            return Ok(());
        }

        let handle = state.next_handle;
        state.next_handle += 1;
        state.stats.opened += 1;
        state.stats.max_live = state.stats.max_live.max(state.stats.live());
        state.handles.insert(
            handle,
            OpenHandle {
                camera_id: camera_id.to_string(),
                callback: Arc::clone(&callback),
                streaming: None,
            },
        );

        debug!(camera_id, handle, "Virtual camera opened");
        let device = VirtualDevice {
            id: camera_id.to_string(),
            handle,
            state: Arc::clone(&self.state),
        };
        state.queue.push_back(Posted::Device {
            callback,
            event: DeviceEvent::Opened(Box::new(device)),
        });

        Ok(())
    }
}

impl Drop for VirtualPlatform {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

impl std::fmt::Debug for VirtualPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualPlatform")
            .field("stats", &self.handle_stats())
            .field("pending_events", &self.pending_events())
            .finish()
    }
}

/// Handle to an open virtual camera
struct VirtualDevice {
    id: String,
    handle: u64,
    state: SharedState,
}

impl CameraDevice for VirtualDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        outputs: Vec<Arc<dyn FrameSink>>,
        callback: SessionCallback,
    ) -> Result<(), PlatformError> {
        let mut state = lock(&self.state);
        let fault = state.fault(&self.id);

        if fault.refuse_session {
            return Err(PlatformError::AccessDenied(format!("session refused for {}", self.id)));
        }
        if !state.handles.contains_key(&self.handle) {
            return Err(PlatformError::Device(PlatformErrorCode::CAMERA_DEVICE));
        }

        let event = if fault.configure_fails || outputs.is_empty() {
            SessionEvent::ConfigureFailed
        } else {
            SessionEvent::Configured(Box::new(VirtualSession {
                handle: self.handle,
                camera_id: self.id.clone(),
                outputs,
                state: Arc::clone(&self.state),
            }))
        };
        state.queue.push_back(Posted::Session { callback, event });

        Ok(())
    }

    fn close(self: Box<Self>) {
        let mut state = lock(&self.state);
        if state.handles.remove(&self.handle).is_some() {
            state.stats.closed += 1;
            debug!(camera_id = %self.id, handle = self.handle, "Virtual camera closed");
        }
    }
}

struct VirtualSession {
    handle: u64,
    camera_id: String,
    outputs: Vec<Arc<dyn FrameSink>>,
    state: SharedState,
}

impl CaptureSession for VirtualSession {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), PlatformError> {
        let mut state = lock(&self.state);

        if state.fault(&self.camera_id).refuse_request {
            return Err(PlatformError::AccessDenied(format!("request refused for {}", self.camera_id)));
        }

        let outputs = self.outputs.clone();
        let Some(handle) = state.handles.get_mut(&self.handle) else {
            return Err(PlatformError::Device(PlatformErrorCode::CAMERA_DEVICE));
        };
        handle.streaming = Some(outputs);
        state.stats.requests += 1;

        debug!(
            camera_id = %self.camera_id,
            targets = request.target_count,
            autofocus = ?request.autofocus,
            "Virtual repeating request started"
        );
        Ok(())
    }

    fn close(self: Box<Self>) {
        if let Some(handle) = lock(&self.state).handles.get_mut(&self.handle) {
            handle.streaming = None;
        }
    }
}

fn dispatch(state: &SharedState) -> usize {
    let mut delivered = 0;

    loop {
        let Some(posted) = lock(state).queue.pop_front() else {
            break;
        };

        match posted {
            Posted::Device { callback, event } => {
                let mut callback = lock(&callback);
                (*callback)(event);
            }
            Posted::Session { callback, event } => callback(event),
        }
        delivered += 1;
    }

    delivered
}

fn submit_all(sinks: Vec<Arc<dyn FrameSink>>, image: RawImage) -> usize {
    let count = sinks.len();
    for sink in sinks {
        sink.submit(image.clone());
    }
    count
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
