// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for capture loops
//!
//! Platforms stream frames from a dedicated thread. This module gives those
//! threads a uniform start/stop story, including the case where the stop is
//! requested from the capture thread itself (for example when a frame
//! listener releases the camera), which must not try to join its own thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by the capture loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Shared stop flag handed to loop bodies
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Controller for a capture loop running in a separate thread
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: StopSignal,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a loop that calls `loop_fn` until it returns `LoopAction::Stop`
    /// or the controller is stopped
    pub fn start<F>(name: &str, mut loop_fn: F) -> std::io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::spawn(name, move |stop| {
            while !stop.is_set() {
                if loop_fn() == LoopAction::Stop {
                    break;
                }
            }
        })
    }

    /// Run `body` on a named thread
    ///
    /// The body owns its resources for the lifetime of the thread and is
    /// expected to poll the stop signal between iterations.
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let stop_signal = StopSignal::default();
        let thread_signal = stop_signal.clone();
        let thread_name = name.to_string();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %thread_name, "Capture loop thread started");
                body(thread_signal);
                info!(name = %thread_name, "Capture loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.stop_signal.set();
    }

    /// Stop the loop and wait for the thread to finish
    ///
    /// When called from the loop thread itself only the signal is set; the
    /// thread exits once the current iteration unwinds.
    pub fn stop(&mut self) {
        self.request_stop();

        let Some(handle) = self.thread_handle.take() else {
            return;
        };

        if handle.thread().id() == thread::current().id() {
            debug!(name = %self.name, "Stop requested from capture thread, not joining");
            return;
        }

        debug!(name = %self.name, "Waiting for capture loop thread to finish");
        if let Err(e) = handle.join() {
            warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

impl std::fmt::Debug for CaptureLoopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureLoopController")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
