//! In-memory sinks and helpers shared by the recording tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::recording::domain::frame_sink::{FrameSink, SinkError, SinkFactory};
use crate::recording::domain::recorder_settings::RecorderSettings;
use crate::shared::frame_buffer::FrameBuffer;
use crate::shared::pixel_format::PixelFormat;

/// What a [`MemorySink`] saw.
#[derive(Debug, Default)]
pub(crate) struct SinkLog {
    /// First byte of every fully accepted frame, in write order.
    pub frames: Vec<u8>,
    pub write_calls: usize,
    pub close_calls: usize,
}

#[derive(Clone, Default)]
pub(crate) struct SinkBehavior {
    /// 1-based write call that accepts only half the bytes.
    pub short_write_on: Option<usize>,
    /// 1-based write call that fails with an I/O error.
    pub fail_on: Option<usize>,
    /// 1-based write call that panics.
    pub panic_on: Option<usize>,
    /// Each write waits for a token; a disconnected gate fails the write.
    pub gate: Option<Receiver<()>>,
}

pub(crate) struct MemorySink {
    log: Arc<Mutex<SinkLog>>,
    behavior: SinkBehavior,
}

impl FrameSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, SinkError> {
        let call = {
            let mut log = self.log.lock().unwrap();
            log.write_calls += 1;
            log.write_calls
        };
        if let Some(gate) = &self.behavior.gate {
            if gate.recv().is_err() {
                return Err(SinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "gate closed",
                )));
            }
        }
        if self.behavior.panic_on == Some(call) {
            panic!("encoder sink blew up on write {call}");
        }
        if self.behavior.fail_on == Some(call) {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder went away",
            )));
        }
        if self.behavior.short_write_on == Some(call) {
            return Ok(bytes.len() / 2);
        }
        self.log
            .lock()
            .unwrap()
            .frames
            .push(bytes.first().copied().unwrap_or(0));
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().close_calls += 1;
        Ok(())
    }
}

/// Opens [`MemorySink`]s and keeps the log of each one, in open order.
#[derive(Clone, Default)]
pub(crate) struct MemorySinkFactory {
    pub logs: Arc<Mutex<Vec<Arc<Mutex<SinkLog>>>>>,
    pub behavior: Arc<Mutex<SinkBehavior>>,
    pub fail_open: Arc<Mutex<bool>>,
}

impl MemorySinkFactory {
    pub fn with_behavior(behavior: SinkBehavior) -> Self {
        let factory = Self::default();
        *factory.behavior.lock().unwrap() = behavior;
        factory
    }

    pub fn sink(&self, index: usize) -> Arc<Mutex<SinkLog>> {
        Arc::clone(&self.logs.lock().unwrap()[index])
    }

    pub fn opened(&self) -> usize {
        self.logs.lock().unwrap().len()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(&self, _settings: &RecorderSettings) -> Result<Box<dyn FrameSink>, SinkError> {
        if *self.fail_open.lock().unwrap() {
            return Err(SinkError::Spawn {
                program: "fake-encoder".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }
        let log = Arc::new(Mutex::new(SinkLog::default()));
        self.logs.lock().unwrap().push(Arc::clone(&log));
        Ok(Box::new(MemorySink {
            log,
            behavior: self.behavior.lock().unwrap().clone(),
        }))
    }
}

pub(crate) fn settings(dir: &std::path::Path, fps: f64) -> RecorderSettings {
    RecorderSettings {
        output_path: dir.join("out.mp4"),
        width: 4,
        height: 2,
        fps,
        ..RecorderSettings::default()
    }
}

/// 4x2 rgb24 frame filled with `value`.
pub(crate) fn frame(value: u8) -> FrameBuffer {
    FrameBuffer::new(vec![value; 24], 4, 2, PixelFormat::Rgb24).unwrap()
}

/// Polls `condition` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
