use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::recording::domain::frame_queue::FrameQueue;
use crate::recording::domain::frame_sink::{FrameSink, SinkError};
use crate::recording::domain::recorder_settings::RecorderSettings;
use crate::recording::domain::recorder_state::{RecorderEvent, RecorderState};
use crate::shared::frame_buffer::FrameBuffer;

/// State shared between the recorder and the writer thread of one session.
///
/// A forced restart builds a new `Session`, so a cancelled writer only ever
/// sees its own queue and sink. The queue lock and the sink lock are never
/// held at the same time.
pub(crate) struct Session {
    settings: RecorderSettings,
    queue: FrameQueue,
    sink: Mutex<Option<Box<dyn FrameSink>>>,
    state: Mutex<RecorderState>,
    recording: AtomicBool,
    ready: AtomicBool,
    cancelled: AtomicBool,
    frames_written: AtomicU64,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    events: Sender<RecorderEvent>,
}

impl Session {
    pub(crate) fn new(
        settings: RecorderSettings,
        sink: Box<dyn FrameSink>,
        events: Sender<RecorderEvent>,
    ) -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            settings,
            queue: FrameQueue::new(),
            sink: Mutex::new(Some(sink)),
            state: Mutex::new(RecorderState::Recording),
            recording: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            frames_written: AtomicU64::new(0),
            wake_tx,
            wake_rx,
            events,
        }
    }

    pub(crate) fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub(crate) fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    pub(crate) fn state(&self) -> RecorderState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_state(&self, next: RecorderState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == next {
            return;
        }
        if !state.can_transition_to(next) {
            log::warn!("Unexpected recorder transition {} -> {next}", *state);
        }
        log::debug!("Recorder state {} -> {next}", *state);
        *state = next;
        self.recording
            .store(next == RecorderState::Recording, Ordering::SeqCst);
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// True once the sink has been closed and the session torn down.
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn sink_open(&self) -> bool {
        self.lock_sink().is_some()
    }

    pub(crate) fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::SeqCst)
    }

    /// Moves `Recording` to `Draining`; the writer finishes the queue.
    pub(crate) fn request_stop(&self) {
        self.set_state(RecorderState::Draining);
        let queued = self.queue.len();
        if queued > 0 {
            self.emit(RecorderEvent::Draining { queued });
        }
        self.wake();
    }

    /// Abandons the session: queued frames are dropped unwritten and the
    /// writer exits at its next check. Returns the number discarded.
    pub(crate) fn cancel(&self) -> usize {
        self.cancelled.store(true, Ordering::SeqCst);
        let discarded = self.queue.clear();
        self.emit(RecorderEvent::Cancelled {
            frames_discarded: discarded,
        });
        self.wake();
        discarded
    }

    /// Writes one whole frame. Anything short of the full frame is an error.
    pub(crate) fn write_frame(&self, frame: &FrameBuffer) -> Result<(), SinkError> {
        let expected = self.settings.frame_len();
        let bytes = &frame.data()[..expected.min(frame.len())];
        let written = match self.lock_sink().as_mut() {
            Some(sink) => sink.write(bytes)?,
            None => return Err(SinkError::Closed),
        };
        if written != expected {
            return Err(SinkError::ShortWrite { written, expected });
        }
        self.frames_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Closes the sink if it is still open. Safe to call more than once;
    /// only the first call reaches the sink.
    pub(crate) fn close_sink(&self) {
        let sink = self.lock_sink().take();
        if let Some(mut sink) = sink {
            log::info!("Closing encoder sink...");
            match sink.close() {
                Ok(()) => log::info!("Encoder sink closed."),
                Err(e) => log::error!("Error closing encoder sink: {e}"),
            }
        }
    }

    /// Final step of every session: sink closed, state `Idle`, ready for a
    /// new `start`.
    pub(crate) fn finish(&self) {
        self.close_sink();
        self.set_state(RecorderState::Idle);
        self.emit(RecorderEvent::Finished {
            frames_written: self.frames_written(),
        });
        self.ready.store(true, Ordering::SeqCst);
    }

    pub(crate) fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Sleeps until woken or `timeout` passes.
    pub(crate) fn wait(&self, timeout: Duration) {
        let _ = self.wake_rx.recv_timeout(timeout);
    }

    /// Publishes `event` without blocking; it is dropped if nobody drains
    /// the channel.
    pub(crate) fn emit(&self, event: RecorderEvent) {
        if let Err(e) = self.events.try_send(event) {
            log::debug!("Event channel full, dropping {:?}", e.into_inner());
        }
    }

    fn lock_sink(&self) -> MutexGuard<'_, Option<Box<dyn FrameSink>>> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }
}
