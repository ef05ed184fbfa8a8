use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::shared::frame_buffer::FrameBuffer;

/// Thread-safe FIFO of frames in presentation order.
///
/// Producing moves a buffer in; consuming moves it out to the caller, who
/// then owns it. Every operation holds the lock only for the queue
/// mutation itself.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<FrameBuffer>>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn produce(&self, frame: FrameBuffer) {
        self.lock().push_back(frame);
    }

    /// Takes the oldest frame, if any.
    pub fn consume(&self) -> Option<FrameBuffer> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every queued frame and returns how many were discarded.
    ///
    /// Frames are dropped front to back so aliases go before their owner.
    pub fn clear(&self) -> usize {
        let drained: Vec<FrameBuffer> = self.lock().drain(..).collect();
        let count = drained.len();
        drop(drained);
        count
    }

    // A panic on another thread must not take the queue down with it; the
    // deque itself is never left half-modified.
    fn lock(&self) -> MutexGuard<'_, VecDeque<FrameBuffer>> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner())
    }
}
