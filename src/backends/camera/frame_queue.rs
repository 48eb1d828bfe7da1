// SPDX-License-Identifier: GPL-3.0-only

//! Bounded frame queue used as the capture session's output surface
//!
//! The platform submits images into the queue from its own threads; the
//! consumer is told an image is available and pulls the latest one with
//! [`FrameQueue::acquire_latest`]. At most `max_images` buffers exist at a
//! time, counting both queued images and frames the consumer holds. Frames
//! are leases: each one hands its slot back exactly once, either through
//! [`Frame::release`] or when dropped.

use super::FrameSink;
use super::types::{OutputSize, PixelFormat, RawImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Called whenever a new image has been queued
pub type FrameListener = Arc<dyn Fn(&Arc<FrameQueue>) + Send + Sync>;

struct QueueState {
    pending: VecDeque<(u64, RawImage)>,
    /// Frames handed out and not yet released
    outstanding: usize,
    next_sequence: u64,
}

/// Counters describing what happened to submitted images
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameQueueStats {
    pub submitted: u64,
    pub acquired: u64,
    pub released: u64,
    /// Queued images superseded by a newer one before anyone acquired them
    pub skipped: u64,
    /// Images discarded because every buffer was held by the consumer
    pub overruns: u64,
}

/// Image reader style frame sink
pub struct FrameQueue {
    size: OutputSize,
    format: PixelFormat,
    max_images: usize,
    state: Mutex<QueueState>,
    listener: Mutex<Option<FrameListener>>,
    submitted: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    skipped: AtomicU64,
    overruns: AtomicU64,
}

impl FrameQueue {
    /// Create a queue for images of `size`, holding at most `max_images` buffers
    pub fn new(size: OutputSize, format: PixelFormat, max_images: usize) -> Arc<Self> {
        let max_images = max_images.max(1);
        debug!(%size, ?format, max_images, "Creating frame queue");

        Arc::new(Self {
            size,
            format,
            max_images,
            state: Mutex::new(QueueState {
                pending: VecDeque::with_capacity(max_images),
                outstanding: 0,
                next_sequence: 0,
            }),
            listener: Mutex::new(None),
            submitted: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        })
    }

    /// Install (or clear) the image-available listener
    pub fn set_listener(&self, listener: Option<FrameListener>) {
        *lock(&self.listener) = listener;
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    /// Frames currently held by the consumer
    pub fn outstanding(&self) -> usize {
        lock(&self.state).outstanding
    }

    /// Images waiting to be acquired
    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn stats(&self) -> FrameQueueStats {
        FrameQueueStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }

    /// Take the newest queued image, discarding anything older
    ///
    /// Returns `None` when nothing is queued (already consumed).
    pub fn acquire_latest(self: &Arc<Self>) -> Option<Frame> {
        let mut state = lock(&self.state);
        let (sequence, image) = state.pending.pop_back()?;

        let stale = state.pending.len() as u64;
        state.pending.clear();
        state.outstanding += 1;
        drop(state);

        if stale > 0 {
            self.skipped.fetch_add(stale, Ordering::Relaxed);
        }
        self.acquired.fetch_add(1, Ordering::Relaxed);
        trace!(sequence, "Frame acquired");

        Some(Frame {
            image,
            sequence,
            lease: Some(FrameLease {
                queue: Arc::clone(self),
            }),
        })
    }

    fn return_slot(&self, sequence: u64) {
        let mut state = lock(&self.state);
        match state.outstanding.checked_sub(1) {
            Some(remaining) => state.outstanding = remaining,
            None => {
                // Unreachable through the lease API
                warn!(sequence, "Frame released with no outstanding frames");
                return;
            }
        }
        drop(state);

        self.released.fetch_add(1, Ordering::Relaxed);
        trace!(sequence, "Frame released");
    }
}

impl FrameSink for FrameQueue {
    fn size(&self) -> OutputSize {
        self.size
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn submit(self: Arc<Self>, image: RawImage) {
        self.submitted.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = lock(&self.state);

            // Make room by dropping the oldest queued image
            while !state.pending.is_empty() && state.pending.len() + state.outstanding >= self.max_images {
                state.pending.pop_front();
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }

            if state.outstanding >= self.max_images {
                drop(state);
                self.overruns.fetch_add(1, Ordering::Relaxed);
                trace!("All frame buffers held by consumer, discarding image");
                return;
            }

            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.pending.push_back((sequence, image));
        }

        // Listener runs without the queue lock so it may acquire immediately
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener(&self);
        }
    }
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("size", &self.size)
            .field("format", &self.format)
            .field("max_images", &self.max_images)
            .field("stats", &self.stats())
            .finish()
    }
}

struct FrameLease {
    queue: Arc<FrameQueue>,
}

/// A frame acquired from a [`FrameQueue`]
///
/// The frame owns one of the queue's buffers until it is released. Release is
/// explicit via [`Frame::release`] or implicit on drop; either way the buffer
/// goes back exactly once.
pub struct Frame {
    image: RawImage,
    sequence: u64,
    lease: Option<FrameLease>,
}

impl Frame {
    /// Frame that does not belong to any queue
    pub fn detached(image: RawImage) -> Self {
        Self {
            image,
            sequence: 0,
            lease: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width
    }

    pub fn height(&self) -> u32 {
        self.image.height
    }

    pub fn stride(&self) -> u32 {
        self.image.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.image.format
    }

    pub fn data(&self) -> &[u8] {
        &self.image.data
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.image.captured_at
    }

    /// Return the buffer to its queue
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.queue.return_slot(self.sequence);
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.image.width)
            .field("height", &self.image.height)
            .field("format", &self.image.format)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
