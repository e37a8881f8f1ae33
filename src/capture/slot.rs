//! Single-slot latest-frame channel
//!
//! The producer publishes finished frames into a one-element channel; if the
//! previous frame was never picked up it is replaced. Consumers drain the
//! slot into the [`FrameStore`], whose buffer, flag and counter sit behind one
//! mutex that is held only for the swap or the copy out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use flume::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use super::frame::{Frame, FrameMetadata};
use crate::error::{CaptureError, Result};

/// Counters shared by the producer and the session.
#[derive(Default)]
pub struct StreamStats {
    frames_published: AtomicU64,
    frames_dropped: AtomicU64,
    frames_overwritten: AtomicU64,
    stopped: AtomicBool,
}

impl StreamStats {
    pub fn published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    /// Samples lost to transform failures or stream changes.
    pub fn dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Published frames replaced before any consumer read them.
    pub fn overwritten(&self) -> u64 {
        self.frames_overwritten.load(Ordering::Relaxed)
    }

    pub fn record_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("vidcap_frames_dropped").increment(1);
    }

    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Create a connected publisher/store pair for frames of `width` x `height`.
pub fn frame_slot(width: u32, height: u32) -> (FramePublisher, FrameStore) {
    let (tx, rx) = flume::bounded(1);
    let stats = Arc::new(CachePadded::new(StreamStats::default()));
    let publisher = FramePublisher {
        tx,
        evict: rx.clone(),
        stats: stats.clone(),
    };
    let store = FrameStore {
        rx,
        state: Mutex::new(FrameState::empty(width, height)),
        stats,
    };
    (publisher, store)
}

/// Producer half.
pub struct FramePublisher {
    tx: Sender<Frame>,
    evict: Receiver<Frame>,
    stats: Arc<CachePadded<StreamStats>>,
}

impl FramePublisher {
    /// Publish `frame`, replacing an unread one. Returns false once the
    /// store side is gone.
    pub fn publish(&self, frame: Frame) -> bool {
        // The eviction handle is ours; anything beyond it is the store
        if self.tx.receiver_count() <= 1 {
            return false;
        }
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => {
                    self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("vidcap_frames_published").increment(1);
                    return true;
                }
                Err(TrySendError::Full(rejected)) => {
                    if self.evict.try_recv().is_ok() {
                        self.stats.frames_overwritten.fetch_add(1, Ordering::Relaxed);
                    }
                    frame = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }
}

struct FrameState {
    buffer: Bytes,
    width: u32,
    height: u32,
    new_frame: bool,
    sequence: u64,
    meta: Option<Arc<FrameMetadata>>,
}

impl FrameState {
    fn empty(width: u32, height: u32) -> Self {
        Self {
            buffer: Bytes::from(vec![0u8; Frame::expected_len(width, height)]),
            width,
            height,
            new_frame: false,
            sequence: 0,
            meta: None,
        }
    }
}

/// Consumer half: the session's current frame.
pub struct FrameStore {
    rx: Receiver<Frame>,
    state: Mutex<FrameState>,
    stats: Arc<CachePadded<StreamStats>>,
}

impl FrameStore {
    fn drain(&self, state: &mut FrameState) {
        while let Ok(frame) = self.rx.try_recv() {
            if !frame.is_complete() {
                continue;
            }
            state.width = frame.meta.width;
            state.height = frame.meta.height;
            state.sequence = frame.meta.sequence;
            state.buffer = frame.data;
            state.meta = Some(frame.meta);
            state.new_frame = true;
        }
    }

    pub fn has_new_frame(&self) -> bool {
        let mut state = self.state.lock();
        self.drain(&mut state);
        state.new_frame
    }

    /// Copy the current frame into `out` and clear the new-frame flag.
    /// Returns the number of bytes written.
    pub fn copy_into(&self, out: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        self.drain(&mut state);
        let len = state.buffer.len();
        if out.len() < len {
            return Err(CaptureError::BufferTooSmall {
                needed: len,
                got: out.len(),
            });
        }
        out[..len].copy_from_slice(&state.buffer);
        state.new_frame = false;
        Ok(len)
    }

    /// Take a shared handle to the current frame bytes without copying.
    pub fn latest(&self) -> (Bytes, Option<Arc<FrameMetadata>>) {
        let mut state = self.state.lock();
        self.drain(&mut state);
        state.new_frame = false;
        (state.buffer.clone(), state.meta.clone())
    }

    pub fn resolution(&self) -> (u32, u32) {
        let mut state = self.state.lock();
        self.drain(&mut state);
        (state.width, state.height)
    }

    pub fn frame_len(&self) -> usize {
        let (width, height) = self.resolution();
        Frame::expected_len(width, height)
    }

    /// Sequence number of the frame currently held, 0 before the first one.
    pub fn sequence(&self) -> u64 {
        let mut state = self.state.lock();
        self.drain(&mut state);
        state.sequence
    }

    /// Drop any pending frame and empty the buffer.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        while self.rx.try_recv().is_ok() {}
        *state = FrameState::empty(0, 0);
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }
}
