// SPDX-License-Identifier: GPL-3.0-only

//! Camera session lifecycle manager
//!
//! The manager provides:
//! - Camera selection and asynchronous device open
//! - Capture session configuration and the repeating request
//! - Serialized, thread-safe ownership of the device handle
//!
//! Platform callbacks become events on an explicit state machine:
//!
//! ```text
//! Closed → Opening → Open → Configuring → Streaming
//!    ▲        │        │         │            │
//!    └────────┴────────┴─────────┴────────────┘  error / disconnect / release
//! ```
//!
//! The device handle and session live inside the phase they belong to, so a
//! phase without a handle cannot hold one and vice versa. Every open bumps a
//! generation counter and so does `release()`; callbacks carrying an older
//! generation are ignored, and a handle delivered by a superseded open is
//! closed on arrival.

use super::selection::{choose_output_size, select_autofocus_mode, select_camera_id};
use super::types::*;
use super::{
    CameraDevice, CameraPlatform, CaptureSession, DeviceCallback, DeviceEvent, FrameSink,
    SessionCallback, SessionEvent,
};
use crate::errors::{CameraError, PlatformError};
use crate::frame_processor::scheduler::CameraInfo;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives lifecycle notifications from the manager
///
/// Called without any manager lock held, so implementations may call back
/// into the manager (including `release()`).
pub trait SessionObserver: Send + Sync {
    /// The device opened and the manager now holds its handle
    fn on_camera_ready(&self, _camera_id: &str) {}

    /// The repeating request is running
    fn on_streaming(&self, _camera_id: &str) {}

    /// A typed camera error; the manager is already back in `Closed`
    fn on_error(&self, error: CameraError);
}

/// Externally visible session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Closed,
    Opening,
    Open,
    Configuring,
    Streaming,
}

enum Phase {
    Closed,
    Opening {
        camera_id: String,
        outputs: Vec<Arc<dyn FrameSink>>,
    },
    Open {
        device: Box<dyn CameraDevice>,
        outputs: Vec<Arc<dyn FrameSink>>,
    },
    Configuring {
        device: Box<dyn CameraDevice>,
        outputs: Vec<Arc<dyn FrameSink>>,
    },
    Streaming {
        device: Box<dyn CameraDevice>,
        session: Box<dyn CaptureSession>,
        session_id: Uuid,
    },
}

impl Phase {
    fn public(&self) -> SessionPhase {
        match self {
            Phase::Closed => SessionPhase::Closed,
            Phase::Opening { .. } => SessionPhase::Opening,
            Phase::Open { .. } => SessionPhase::Open,
            Phase::Configuring { .. } => SessionPhase::Configuring,
            Phase::Streaming { .. } => SessionPhase::Streaming,
        }
    }
}

struct SessionState {
    phase: Phase,
    generation: u64,
}

/// Camera info read on the frame path, kept apart from the session lock
struct InfoCache {
    requested_facing: CameraFacing,
    open: Option<CameraCharacteristics>,
}

/// Resources pulled out of the state machine, closed after the lock is gone
#[derive(Default)]
struct Teardown {
    session: Option<Box<dyn CaptureSession>>,
    device: Option<Box<dyn CameraDevice>>,
}

impl Teardown {
    fn from_phase(phase: Phase) -> Self {
        match phase {
            Phase::Closed | Phase::Opening { .. } => Teardown::default(),
            Phase::Open { device, .. } | Phase::Configuring { device, .. } => Teardown {
                session: None,
                device: Some(device),
            },
            Phase::Streaming {
                device, session, ..
            } => Teardown {
                session: Some(session),
                device: Some(device),
            },
        }
    }

    fn is_empty(&self) -> bool {
        self.session.is_none() && self.device.is_none()
    }
}

enum Notice {
    Ready(String),
    Streaming(String),
    Error(CameraError),
}

/// Owns the camera device handle and its capture session
pub struct CameraSessionManager {
    platform: Arc<dyn CameraPlatform>,
    observer: Arc<dyn SessionObserver>,
    state: Mutex<SessionState>,
    info: Mutex<InfoCache>,
    /// Held while a handle is being closed or a new one requested
    device_gate: Mutex<()>,
    self_ref: Weak<CameraSessionManager>,
}

impl CameraSessionManager {
    /// Create a manager over `platform`, reporting to `observer`
    pub fn new(
        platform: Arc<dyn CameraPlatform>,
        observer: Arc<dyn SessionObserver>,
        facing: CameraFacing,
    ) -> Arc<Self> {
        info!(facing = %facing, "Creating camera session manager");

        Arc::new_cyclic(|self_ref| Self {
            platform,
            observer,
            state: Mutex::new(SessionState {
                phase: Phase::Closed,
                generation: 0,
            }),
            info: Mutex::new(InfoCache {
                requested_facing: facing,
                open: None,
            }),
            device_gate: Mutex::new(()),
            self_ref: self_ref.clone(),
        })
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        lock(&self.state).phase.public()
    }

    /// Id of the running capture session, for log correlation
    pub fn session_id(&self) -> Option<Uuid> {
        match &lock(&self.state).phase {
            Phase::Streaming { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }

    /// Facing used for the next camera selection
    pub fn requested_facing(&self) -> CameraFacing {
        lock(&self.info).requested_facing
    }

    /// Change the facing used for the next camera selection
    ///
    /// Does not touch a running session; restart to apply.
    pub fn set_camera_facing(&self, facing: CameraFacing) {
        lock(&self.info).requested_facing = facing;
    }

    /// Start opening a camera and streaming into `outputs`
    ///
    /// Returns immediately; outcomes are reported through the observer. Does
    /// nothing unless the manager is `Closed`. Returns the generation of the
    /// accepted start, or `None` when the start was ignored or no camera
    /// resolved, in which case `outputs` were never handed to the platform.
    pub fn start(&self, outputs: Vec<Arc<dyn FrameSink>>) -> Option<u64> {
        let facing = self.requested_facing();

        let mut state = lock(&self.state);
        if !matches!(state.phase, Phase::Closed) {
            debug!(phase = ?state.phase.public(), "Start ignored, camera not closed");
            return None;
        }

        let camera_id = match self.resolve_camera_id(facing) {
            Some(id) => id,
            None => {
                drop(state);
                warn!(facing = %facing, "No camera available");
                self.notify(vec![Notice::Error(CameraError::NoCameraAvailable)]);
                return None;
            }
        };

        state.generation += 1;
        let generation = state.generation;
        state.phase = Phase::Opening {
            camera_id: camera_id.clone(),
            outputs,
        };
        drop(state);

        info!(camera_id = %camera_id, generation, "Opening camera");

        let refused = {
            let _gate = lock(&self.device_gate);
            self.platform
                .open_camera(&camera_id, self.device_callback(generation))
                .err()
        };

        if let Some(error) = refused {
            warn!(camera_id = %camera_id, error = %error, "Camera open refused");
            let mut state = lock(&self.state);
            let still_ours = state.generation == generation && matches!(state.phase, Phase::Opening { .. });
            if still_ours {
                state.phase = Phase::Closed;
            }
            drop(state);

            if still_ours {
                self.notify(vec![Notice::Error(map_platform_error(&error))]);
            }
        }

        Some(generation)
    }

    /// Counter bumped by every accepted start and every release
    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    /// Close the session and device if present
    ///
    /// Idempotent and safe from any phase, any thread, and from inside
    /// observer or frame callbacks. Returns the generation this release
    /// moved to; every start accepted before it has a lower one.
    pub fn release(&self) -> u64 {
        let (generation, teardown) = {
            let mut state = lock(&self.state);
            state.generation += 1;
            let phase = std::mem::replace(&mut state.phase, Phase::Closed);
            lock(&self.info).open = None;
            (state.generation, Teardown::from_phase(phase))
        };

        if teardown.is_empty() {
            debug!(generation, "Release: no camera held");
            return generation;
        }

        info!(generation, "Releasing camera");
        self.close_resources(teardown);
        generation
    }

    /// Output size for a minimum subject width
    ///
    /// Uses the open camera, or the camera selection would pick right now.
    pub fn output_size(&self, min_width: u32) -> Option<OutputSize> {
        let characteristics = self.camera_characteristics()?;
        choose_output_size(&characteristics.output_sizes, min_width)
    }

    /// Facing of the open camera, or of the camera selection would pick
    pub fn camera_facing(&self) -> Option<CameraFacing> {
        let facing = {
            let info = lock(&self.info);
            if let Some(open) = &info.open {
                return Some(open.facing);
            }
            info.requested_facing
        };
        self.resolve_characteristics(facing).map(|c| c.facing)
    }

    /// Sensor orientation of the open camera, or of the camera selection would pick
    pub fn sensor_orientation(&self) -> Option<SensorRotation> {
        let facing = {
            let info = lock(&self.info);
            if let Some(open) = &info.open {
                return Some(open.sensor_orientation);
            }
            info.requested_facing
        };
        self.resolve_characteristics(facing)
            .map(|c| c.sensor_orientation)
    }

    /// Characteristics of the open camera, or of the camera selection would pick
    pub fn camera_characteristics(&self) -> Option<CameraCharacteristics> {
        let facing = {
            let info = lock(&self.info);
            if let Some(open) = &info.open {
                return Some(open.clone());
            }
            info.requested_facing
        };
        self.resolve_characteristics(facing)
    }

    fn resolve_camera_id(&self, facing: CameraFacing) -> Option<String> {
        let ids = match self.platform.camera_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate cameras");
                return None;
            }
        };

        select_camera_id(&ids, facing, |id| {
            self.platform.characteristics(id).ok().map(|c| c.facing)
        })
        .map(str::to_string)
    }

    fn resolve_characteristics(&self, facing: CameraFacing) -> Option<CameraCharacteristics> {
        let id = self.resolve_camera_id(facing)?;
        match self.platform.characteristics(&id) {
            Ok(characteristics) => Some(characteristics),
            Err(e) => {
                warn!(camera_id = %id, error = %e, "Failed to query camera characteristics");
                None
            }
        }
    }

    fn device_callback(&self, generation: u64) -> DeviceCallback {
        let manager = self.self_ref.clone();
        Box::new(move |event: DeviceEvent| match manager.upgrade() {
            Some(manager) => manager.on_device_event(generation, event),
            None => {
                // Manager is gone; nobody else may own this handle
                if let DeviceEvent::Opened(device) = event {
                    device.close();
                }
            }
        })
    }

    fn session_callback(&self, generation: u64) -> SessionCallback {
        let manager = self.self_ref.clone();
        Box::new(move |event: SessionEvent| match manager.upgrade() {
            Some(manager) => manager.on_session_event(generation, event),
            None => {
                if let SessionEvent::Configured(session) = event {
                    session.close();
                }
            }
        })
    }

    fn on_device_event(&self, generation: u64, event: DeviceEvent) {
        debug!(generation, ?event, "Device event");

        match event {
            DeviceEvent::Opened(device) => self.on_opened(generation, device),
            DeviceEvent::Disconnected => {
                if let Some(teardown) = self.teardown_if_current(generation) {
                    info!(generation, "Camera disconnected");
                    self.close_resources(teardown);
                }
            }
            DeviceEvent::Error(code) => {
                if let Some(teardown) = self.teardown_if_current(generation) {
                    let error = CameraError::from_platform_code(code);
                    warn!(generation, code = %code, error = %error, "Camera device error");
                    self.close_resources(teardown);
                    self.notify(vec![Notice::Error(error)]);
                }
            }
        }
    }

    fn on_opened(&self, generation: u64, device: Box<dyn CameraDevice>) {
        let mut state = lock(&self.state);

        let outputs = match std::mem::replace(&mut state.phase, Phase::Closed) {
            Phase::Opening { outputs, camera_id } if state.generation == generation => {
                debug!(camera_id = %camera_id, "Open request completed");
                outputs
            }
            other => {
                state.phase = other;
                drop(state);
                debug!(generation, "Closing camera from superseded open");
                self.close_resources(Teardown {
                    session: None,
                    device: Some(device),
                });
                return;
            }
        };

        let camera_id = device.id().to_string();
        let characteristics = self.platform.characteristics(&camera_id).unwrap_or_else(|e| {
            warn!(camera_id = %camera_id, error = %e, "Characteristics unavailable for open camera");
            CameraCharacteristics {
                id: camera_id.clone(),
                facing: CameraFacing::Unknown,
                sensor_orientation: SensorRotation::None,
                output_sizes: Vec::new(),
                autofocus_modes: Vec::new(),
            }
        });
        lock(&self.info).open = Some(characteristics);

        state.phase = Phase::Open { device, outputs };
        drop(state);

        info!(camera_id = %camera_id, "Camera opened");
        self.notify(vec![Notice::Ready(camera_id)]);

        // The observer may have released the camera in the meantime
        self.configure(generation);
    }

    fn configure(&self, generation: u64) {
        let mut state = lock(&self.state);

        let (mut device, outputs) = match std::mem::replace(&mut state.phase, Phase::Closed) {
            Phase::Open { device, outputs } if state.generation == generation => (device, outputs),
            other => {
                state.phase = other;
                return;
            }
        };

        // Platforms never call back before this returns, so holding the lock is fine
        let created = device.create_capture_session(outputs.clone(), self.session_callback(generation));

        match created {
            Ok(()) => {
                info!(camera_id = %device.id(), outputs = outputs.len(), "Configuring capture session");
                state.phase = Phase::Configuring { device, outputs };
            }
            Err(error) => {
                warn!(camera_id = %device.id(), error = %error, "Capture session creation refused");
                lock(&self.info).open = None;
                drop(state);

                self.close_resources(Teardown {
                    session: None,
                    device: Some(device),
                });
                self.notify(vec![Notice::Error(CameraError::CameraAccessDenied(error.to_string()))]);
            }
        }
    }

    fn on_session_event(&self, generation: u64, event: SessionEvent) {
        match event {
            SessionEvent::Configured(session) => self.on_configured(generation, session),
            SessionEvent::ConfigureFailed => {
                if let Some(teardown) = self.teardown_if_current(generation) {
                    warn!(generation, "Capture session configuration failed");
                    self.close_resources(teardown);
                    self.notify(vec![Notice::Error(CameraError::SessionConfigurationFailed)]);
                }
            }
        }
    }

    fn on_configured(&self, generation: u64, mut session: Box<dyn CaptureSession>) {
        let mut state = lock(&self.state);

        let (device, outputs) = match std::mem::replace(&mut state.phase, Phase::Closed) {
            Phase::Configuring { device, outputs } if state.generation == generation => (device, outputs),
            other => {
                // Handle already gone: nothing may be issued on this session
                state.phase = other;
                drop(state);
                debug!(generation, "Dropping session configured for a released camera");
                session.close();
                return;
            }
        };

        let autofocus = lock(&self.info).open.as_ref().and_then(|c| {
            if c.autofocus_modes.is_empty() {
                None
            } else {
                Some(select_autofocus_mode(&c.autofocus_modes))
            }
        });

        let request = CaptureRequest {
            target_count: outputs.len(),
            autofocus,
        };
        let camera_id = device.id().to_string();

        match session.set_repeating_request(&request) {
            Ok(()) => {
                let session_id = Uuid::new_v4();
                info!(
                    camera_id = %camera_id,
                    session_id = %session_id,
                    autofocus = ?request.autofocus,
                    targets = request.target_count,
                    "Repeating capture request started"
                );
                state.phase = Phase::Streaming {
                    device,
                    session,
                    session_id,
                };
                drop(state);
                self.notify(vec![Notice::Streaming(camera_id)]);
            }
            Err(error) => {
                warn!(camera_id = %camera_id, error = %error, "Repeating request refused");
                lock(&self.info).open = None;
                drop(state);

                self.close_resources(Teardown {
                    session: Some(session),
                    device: Some(device),
                });
                self.notify(vec![Notice::Error(CameraError::CameraAccessDenied(error.to_string()))]);
            }
        }
    }

    /// Move to `Closed` if `generation` is still the live one
    fn teardown_if_current(&self, generation: u64) -> Option<Teardown> {
        let mut state = lock(&self.state);
        if state.generation != generation || matches!(state.phase, Phase::Closed) {
            return None;
        }

        let phase = std::mem::replace(&mut state.phase, Phase::Closed);
        lock(&self.info).open = None;
        Some(Teardown::from_phase(phase))
    }

    fn close_resources(&self, teardown: Teardown) {
        let _gate = lock(&self.device_gate);
        if let Some(session) = teardown.session {
            session.close();
        }
        if let Some(device) = teardown.device {
            debug!(camera_id = %device.id(), "Closing camera device");
            device.close();
        }
    }

    fn notify(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Ready(id) => self.observer.on_camera_ready(&id),
                Notice::Streaming(id) => self.observer.on_streaming(&id),
                Notice::Error(error) => self.observer.on_error(error),
            }
        }
    }
}

impl std::fmt::Debug for CameraSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSessionManager")
            .field("phase", &self.phase())
            .field("requested_facing", &self.requested_facing())
            .finish()
    }
}

impl CameraInfo for CameraSessionManager {
    fn camera_facing(&self) -> Option<CameraFacing> {
        CameraSessionManager::camera_facing(self)
    }

    fn sensor_orientation(&self) -> Option<SensorRotation> {
        CameraSessionManager::sensor_orientation(self)
    }
}

/// Map a synchronous platform failure to the caller-facing error kind
pub fn map_platform_error(error: &PlatformError) -> CameraError {
    match error {
        PlatformError::AccessDenied(msg) => CameraError::CameraAccessDenied(msg.clone()),
        PlatformError::Device(code) => CameraError::from_platform_code(*code),
        PlatformError::UnknownCamera(_) => CameraError::NoCameraAvailable,
        PlatformError::Io(e) => CameraError::Generic(e.raw_os_error().unwrap_or(-1)),
        PlatformError::Source(_) => CameraError::CameraDeviceError,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
