use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::recording::domain::clock::Clock;
use crate::recording::domain::frame_sink::SinkError;
use crate::recording::domain::pacing::frame_period;
use crate::recording::domain::recorder_state::{RecorderEvent, RecorderState};
use crate::recording::error::RecorderError;
use crate::recording::session::Session;
use crate::shared::constants::WRITER_POLL_INTERVAL_MS;

/// Spawns the single writer thread of a session.
pub(crate) fn spawn(
    session: Arc<Session>,
    clock: Arc<dyn Clock>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("framepace-writer".to_string())
        .spawn(move || run(&session, clock.as_ref()))
}

/// Feeds queued frames to the sink at the configured frame rate.
///
/// Returns once the session has stopped recording and the queue is empty,
/// the session is cancelled, or a write fails. The sink is closed on every
/// exit path.
pub(crate) fn run(session: &Session, clock: &dyn Clock) {
    let _teardown = Teardown(session);
    let fps = session.settings().fps;
    let period = frame_period(fps);
    let poll = Duration::from_millis(WRITER_POLL_INTERVAL_MS);
    let mut last_write = clock.now();
    let mut announced_drain = false;
    let mut fault: Option<SinkError> = None;

    loop {
        if session.is_cancelled() {
            break;
        }

        if session.queue().is_empty() {
            if session.state() != RecorderState::Recording {
                break;
            }
            session.wait(poll);
            continue;
        }

        let since_last = clock.now().saturating_duration_since(last_write);
        if since_last < period {
            session.wait((period - since_last).min(poll));
            continue;
        }

        if !announced_drain && session.state() != RecorderState::Recording {
            log::info!(
                "Recording stopped, but finishing frame queue - {} remaining frames at {fps} fps",
                session.queue().len()
            );
            announced_drain = true;
        }

        let Some(frame) = session.queue().consume() else {
            log::error!("{}", RecorderError::QueueConsumeFailure);
            continue;
        };

        let result = session.write_frame(&frame);
        drop(frame);
        if let Err(e) = result {
            fault = Some(e);
            break;
        }
        last_write = clock.now();
    }

    if let Some(err) = fault {
        abandon(session, err);
    } else if session.is_cancelled() {
        let leftover = session.queue().clear();
        if leftover > 0 {
            log::warn!("Writer cancelled with {leftover} frames still queued");
        }
    }

    log::info!(
        "Writer finished after {} frames",
        session.frames_written()
    );
}

/// Finishes the session when the writer exits, unwinding included, so the
/// sink is closed and the recorder becomes ready again.
struct Teardown<'a>(&'a Session);

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let discarded = self.0.queue().clear();
            log::error!("Writer thread panicked, dropping {discarded} queued frames");
        }
        self.0.finish();
    }
}

/// A failed write ends the session: the rest of the queue is dropped
/// without being written.
fn abandon(session: &Session, err: SinkError) {
    let err = RecorderError::SinkWriteFailure(err);
    log::error!("{err}. Cancelling recording!");
    session.set_state(RecorderState::Faulted);
    let discarded = session.queue().clear();
    if discarded > 0 {
        log::warn!("Discarding {discarded} queued frames");
    }
    session.emit(RecorderEvent::Faulted {
        reason: err.to_string(),
        frames_discarded: discarded,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::domain::clock::SystemClock;
    use crate::recording::domain::frame_sink::SinkFactory;
    use crate::recording::test_support::{frame, settings, MemorySinkFactory, SinkBehavior};
    use std::time::Instant;

    fn session_with(
        factory: &MemorySinkFactory,
        fps: f64,
    ) -> (Session, crossbeam_channel::Receiver<RecorderEvent>) {
        let dir = std::env::temp_dir();
        let settings = settings(&dir, fps);
        let sink = factory.open(&settings).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        (Session::new(settings, sink, tx), rx)
    }

    #[test]
    fn test_drains_queue_after_stop() {
        let factory = MemorySinkFactory::default();
        let (session, events) = session_with(&factory, 500.0);
        for v in 1..=3 {
            session.queue().produce(frame(v));
        }
        session.request_stop();

        run(&session, &SystemClock);

        let log = factory.sink(0);
        let log = log.lock().unwrap();
        assert_eq!(log.frames, vec![1, 2, 3]);
        assert_eq!(log.close_calls, 1);
        assert!(session.queue().is_empty());
        assert!(session.is_ready());
        assert_eq!(session.state(), RecorderState::Idle);

        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(
            events,
            vec![
                RecorderEvent::Draining { queued: 3 },
                RecorderEvent::Finished { frames_written: 3 },
            ]
        );
    }

    #[test]
    fn test_short_write_abandons_rest_of_queue() {
        let factory = MemorySinkFactory::with_behavior(SinkBehavior {
            short_write_on: Some(3),
            ..SinkBehavior::default()
        });
        let (session, events) = session_with(&factory, 500.0);
        for v in 1..=6 {
            session.queue().produce(frame(v));
        }

        run(&session, &SystemClock);

        let log = factory.sink(0);
        let log = log.lock().unwrap();
        assert_eq!(log.frames, vec![1, 2]);
        assert_eq!(log.write_calls, 3);
        assert_eq!(log.close_calls, 1);
        assert!(session.queue().is_empty());
        assert!(session.is_ready());
        assert!(!session.is_recording());

        let events: Vec<_> = events.try_iter().collect();
        assert!(matches!(
            &events[0],
            RecorderEvent::Faulted { frames_discarded: 3, reason } if reason.contains("short write")
        ));
        assert_eq!(events[1], RecorderEvent::Finished { frames_written: 2 });
    }

    #[test]
    fn test_sink_error_is_terminal() {
        let factory = MemorySinkFactory::with_behavior(SinkBehavior {
            fail_on: Some(1),
            ..SinkBehavior::default()
        });
        let (session, _events) = session_with(&factory, 500.0);
        session.queue().produce(frame(1));
        session.queue().produce(frame(2));

        run(&session, &SystemClock);

        let log = factory.sink(0);
        let log = log.lock().unwrap();
        assert!(log.frames.is_empty());
        assert_eq!(log.write_calls, 1);
        assert_eq!(log.close_calls, 1);
        assert!(session.is_ready());
    }

    #[test]
    fn test_cancelled_session_writes_nothing() {
        let factory = MemorySinkFactory::default();
        let (session, _events) = session_with(&factory, 500.0);
        session.queue().produce(frame(1));
        assert_eq!(session.cancel(), 1);

        run(&session, &SystemClock);

        let log = factory.sink(0);
        let log = log.lock().unwrap();
        assert_eq!(log.write_calls, 0);
        assert_eq!(log.close_calls, 1);
        assert!(session.is_ready());
    }

    #[test]
    fn test_panicking_sink_still_tears_session_down() {
        let factory = MemorySinkFactory::with_behavior(SinkBehavior {
            panic_on: Some(2),
            ..SinkBehavior::default()
        });
        let (session, events) = session_with(&factory, 500.0);
        let session = Arc::new(session);
        for v in 1..=4 {
            session.queue().produce(frame(v));
        }

        let handle = spawn(Arc::clone(&session), Arc::new(SystemClock)).unwrap();
        assert!(handle.join().is_err());

        let log = factory.sink(0);
        let log = log.lock().unwrap();
        assert_eq!(log.frames, vec![1]);
        assert_eq!(log.close_calls, 1);
        assert!(session.queue().is_empty());
        assert!(session.is_ready());
        assert_eq!(session.state(), RecorderState::Idle);
        assert!(events
            .try_iter()
            .any(|e| e == RecorderEvent::Finished { frames_written: 1 }));
    }

    #[test]
    fn test_writes_are_paced_at_frame_period() {
        let factory = MemorySinkFactory::default();
        let (session, _events) = session_with(&factory, 50.0);
        for v in 0..5 {
            session.queue().produce(frame(v));
        }
        session.request_stop();

        let started = Instant::now();
        run(&session, &SystemClock);
        let elapsed = started.elapsed();

        // First write one period after start, then one per period: 5 x 20ms.
        assert!(elapsed >= Duration::from_millis(95), "took {elapsed:?}");
        assert_eq!(factory.sink(0).lock().unwrap().frames.len(), 5);
    }
}
