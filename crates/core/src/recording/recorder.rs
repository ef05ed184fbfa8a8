use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::recording::domain::clock::{Clock, SystemClock};
use crate::recording::domain::frame_queue::FrameQueue;
use crate::recording::domain::frame_sink::SinkFactory;
use crate::recording::domain::pacing::{recorded_duration, Timeline};
use crate::recording::domain::recorder_settings::RecorderSettings;
use crate::recording::domain::recorder_state::{RecorderEvent, RecorderState};
use crate::recording::error::RecorderError;
use crate::recording::session::Session;
use crate::recording::writer_loop;
use crate::shared::constants::EVENT_CHANNEL_CAPACITY;
use crate::shared::frame_buffer::FrameBuffer;
use crate::video::infrastructure::ffmpeg_pipe_sink::FfmpegSinkFactory;

/// Re-times irregular frames into a constant-rate stream for an encoder.
///
/// The producer (usually a render loop) calls [`add_frame`](Self::add_frame)
/// whenever it has a picture. The recorder duplicates or collapses frames so
/// the queued stream matches wall time at the configured frame rate, and a
/// dedicated writer thread feeds the queue to the sink one frame period
/// apart.
///
/// One session runs at a time. The writer thread is spawned on the first
/// accepted frame and is always joined before the recorder is dropped.
pub struct Recorder {
    sink_factory: Box<dyn SinkFactory>,
    clock: Arc<dyn Clock>,
    settings: RecorderSettings,
    session: Option<Arc<Session>>,
    writer: Option<JoinHandle<()>>,
    /// Writers of force-restarted sessions, still closing their sinks.
    cancelled_writers: Vec<JoinHandle<()>>,
    frames_added: u64,
    record_start_time: Option<Instant>,
    last_frame_time: Option<Instant>,
    events_tx: Sender<RecorderEvent>,
    events_rx: Receiver<RecorderEvent>,
}

impl Recorder {
    /// Recorder that pipes frames into a spawned `ffmpeg` process.
    pub fn new() -> Self {
        Self::with_sink_factory(Box::new(FfmpegSinkFactory))
    }

    pub fn with_sink_factory(sink_factory: Box<dyn SinkFactory>) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);
        Self {
            sink_factory,
            clock: Arc::new(SystemClock),
            settings: RecorderSettings::default(),
            session: None,
            writer: None,
            cancelled_writers: Vec::new(),
            frames_added: 0,
            record_start_time: None,
            last_frame_time: None,
            events_tx,
            events_rx,
        }
    }

    /// Replaces the time source used for pacing.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Starts a new session.
    ///
    /// Fails if a session is recording, or if the previous session is still
    /// draining and `force_if_not_ready` is false. Forcing is lossy: the
    /// previous session's queued frames are discarded unwritten.
    pub fn start(
        &mut self,
        settings: RecorderSettings,
        force_if_not_ready: bool,
    ) -> Result<(), RecorderError> {
        let result = self.try_start(settings, force_if_not_ready);
        if let Err(e) = &result {
            log::error!("Can't start recording - {e}");
        }
        result
    }

    fn try_start(
        &mut self,
        settings: RecorderSettings,
        force_if_not_ready: bool,
    ) -> Result<(), RecorderError> {
        if self.is_recording() {
            return Err(RecorderError::AlreadyRecording);
        }

        if !self.is_ready() {
            if !force_if_not_ready {
                return Err(RecorderError::PreviousSessionBusy {
                    queued: self.num_frames_in_queue(),
                });
            }
            self.cancel_session();
        }

        if settings.output_path.as_os_str().is_empty() {
            return Err(RecorderError::InvalidOutputPath);
        }
        settings.validate().map_err(RecorderError::InvalidSettings)?;
        if !settings.allow_overwrite && settings.output_path.exists() {
            return Err(RecorderError::OutputExistsNoOverwrite(
                settings.output_path.clone(),
            ));
        }

        self.retire_session();

        let sink = self
            .sink_factory
            .open(&settings)
            .map_err(RecorderError::SinkOpenFailure)?;

        self.settings = settings;
        self.frames_added = 0;
        self.record_start_time = None;
        self.last_frame_time = None;
        self.session = Some(Arc::new(Session::new(
            self.settings.clone(),
            sink,
            self.events_tx.clone(),
        )));

        log::info!(
            "Recording started: {} ({}x{} @ {} fps)",
            self.settings.output_path.display(),
            self.settings.width,
            self.settings.height,
            self.settings.fps
        );
        if self
            .events_tx
            .try_send(RecorderEvent::Started {
                output_path: self.settings.output_path.clone(),
            })
            .is_err()
        {
            log::debug!("Event channel full, dropping Started");
        }
        Ok(())
    }

    /// Requests the end of the session without blocking.
    ///
    /// The writer finishes the queued frames, then closes the sink; watch
    /// [`is_ready`](Self::is_ready) for completion. No frames are accepted
    /// in the meantime.
    pub fn stop(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.state() != RecorderState::Recording {
            return;
        }
        if self.writer.is_some() {
            log::info!(
                "Stopping recording with {} frames queued",
                session.queue().len()
            );
            session.request_stop();
        } else {
            log::info!("Stopping recording before any frame was added");
            session.finish();
        }
    }

    /// Whether the producer should build a frame now.
    ///
    /// True while recording with an open sink when the next frame is owed
    /// (always true before the first frame). Has no side effects.
    pub fn wants_frame(&self) -> bool {
        let Some(session) = self.live_session() else {
            return false;
        };
        if !session.is_recording() || !session.sink_open() {
            return false;
        }
        match self.record_start_time {
            None => true,
            Some(start) => {
                let elapsed = self.clock.now().saturating_duration_since(start);
                self.timeline().due(elapsed, self.frames_added) > 0
            }
        }
    }

    /// Queues `frame` as many times as the timeline currently owes, and at
    /// least once. Returns the number of queue entries produced.
    ///
    /// The pixels are copied once. Every entry but the last is an alias of
    /// that copy; the copy itself goes last, so it is the final handle
    /// released by the writer.
    pub fn add_frame(&mut self, frame: &FrameBuffer) -> Result<usize, RecorderError> {
        let result = self.try_add_frame(frame);
        if let Err(e) = &result {
            log::error!("Can't add new frame - {e}");
        }
        result
    }

    fn try_add_frame(&mut self, frame: &FrameBuffer) -> Result<usize, RecorderError> {
        let session = match self.live_session() {
            Some(s) if s.is_recording() => Arc::clone(s),
            _ => return Err(RecorderError::NotRecording),
        };
        if !session.sink_open() {
            return Err(RecorderError::SinkUnavailable);
        }
        if !frame.is_allocated() {
            return Err(RecorderError::UnallocatedInput);
        }
        self.check_frame_layout(frame)?;

        if self.frames_added == 0 {
            self.spawn_writer(&session)?;
            let now = self.clock.now();
            self.record_start_time = Some(now);
            self.last_frame_time = Some(now);
        }

        let start = self.record_start_time.unwrap_or_else(|| self.clock.now());
        let elapsed = self.clock.now().saturating_duration_since(start);
        let count = self
            .timeline()
            .replication_count(elapsed, self.frames_added);

        enqueue_into_live_session(&session, frame, count)?;
        for _ in 0..count {
            self.frame_enqueued();
        }
        session.wake();

        if count > 1 {
            log::trace!("Frame duplicated {count} times to keep {} fps", self.settings.fps);
        }
        Ok(count as usize)
    }

    pub fn is_recording(&self) -> bool {
        self.live_session().is_some_and(|s| s.is_recording())
    }

    /// True when no session holds an open sink, so `start` can proceed
    /// without forcing.
    pub fn is_ready(&self) -> bool {
        self.live_session().map_or(true, |s| s.is_ready())
    }

    pub fn state(&self) -> RecorderState {
        self.live_session()
            .map_or(RecorderState::Idle, |s| s.state())
    }

    /// Playback length of the frames queued so far in this session.
    pub fn recorded_duration(&self) -> Duration {
        recorded_duration(self.frames_added, self.settings.fps)
    }

    pub fn num_frames_in_queue(&self) -> usize {
        self.live_session().map_or(0, |s| s.queue().len())
    }

    /// Output frames accepted into the queue since the session started.
    pub fn frames_added(&self) -> u64 {
        self.frames_added
    }

    /// Frames the writer has delivered to the sink in this session.
    pub fn frames_written(&self) -> u64 {
        self.live_session().map_or(0, |s| s.frames_written())
    }

    pub fn last_frame_time(&self) -> Option<Instant> {
        self.last_frame_time
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Session notifications. Receivers share one stream: each event goes
    /// to whichever receiver takes it first. The channel holds at most
    /// [`EVENT_CHANNEL_CAPACITY`] undelivered events; newer ones are dropped
    /// while it is full.
    pub fn events(&self) -> Receiver<RecorderEvent> {
        self.events_rx.clone()
    }

    fn live_session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    fn timeline(&self) -> Timeline {
        Timeline::new(self.settings.fps)
    }

    fn frame_enqueued(&mut self) {
        self.frames_added += 1;
        self.last_frame_time = Some(self.clock.now());
    }

    fn check_frame_layout(&self, frame: &FrameBuffer) -> Result<(), RecorderError> {
        let s = &self.settings;
        if frame.width() != s.width || frame.height() != s.height || frame.format() != s.pixel_format
        {
            return Err(RecorderError::FrameMismatch {
                width: frame.width(),
                height: frame.height(),
                format: frame.format(),
                expected_width: s.width,
                expected_height: s.height,
                expected_format: s.pixel_format,
            });
        }
        Ok(())
    }

    fn spawn_writer(&mut self, session: &Arc<Session>) -> Result<(), RecorderError> {
        let handle = writer_loop::spawn(Arc::clone(session), Arc::clone(&self.clock))
            .map_err(RecorderError::WriterSpawnFailure)?;
        self.writer = Some(handle);
        Ok(())
    }

    /// Abandons the current session. Its writer, if any, closes the sink
    /// on its own thread and is joined later.
    fn cancel_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        log::warn!(
            "Starting new recording - cancelling previous still-processing recording '{}' and deleting {} queued frames...",
            session.settings().output_path.display(),
            session.queue().len()
        );
        session.cancel();
        match self.writer.take() {
            Some(handle) => self.cancelled_writers.push(handle),
            None => session.finish(),
        }
    }

    /// Releases a finished session and reaps writers that have exited.
    fn retire_session(&mut self) {
        if let Some(handle) = self.writer.take() {
            join_writer(handle);
        }
        if let Some(session) = self.session.take() {
            if !session.is_ready() {
                session.finish();
            }
        }
        let (finished, running): (Vec<_>, Vec<_>) = self
            .cancelled_writers
            .drain(..)
            .partition(|h| h.is_finished());
        finished.into_iter().for_each(join_writer);
        self.cancelled_writers = running;
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.writer.take() {
            join_writer(handle);
        }
        for handle in self.cancelled_writers.drain(..) {
            join_writer(handle);
        }
        if let Some(session) = self.session.take() {
            if !session.is_ready() {
                session.finish();
            }
        }
    }
}

/// Queues `count` entries of `frame`: aliases of one owning copy first,
/// the owning copy last.
fn enqueue_copies(queue: &FrameQueue, frame: &FrameBuffer, count: u64) {
    let owner = frame.deep_copy();
    for _ in 1..count {
        queue.produce(owner.alias());
    }
    queue.produce(owner);
}

/// Queues `count` entries unless the writer ended the session meanwhile.
///
/// A writer fault clears the queue after leaving `Recording`, so entries
/// pushed before the state check below are cleared by the writer and
/// entries pushed after it are cleared here.
fn enqueue_into_live_session(
    session: &Session,
    frame: &FrameBuffer,
    count: u64,
) -> Result<(), RecorderError> {
    enqueue_copies(session.queue(), frame, count);
    if !session.is_recording() {
        let discarded = session.queue().clear();
        log::warn!("Session ended while queueing, discarding {discarded} frames");
        return Err(RecorderError::NotRecording);
    }
    Ok(())
}

fn join_writer(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::error!("Writer thread panicked");
    }
}
