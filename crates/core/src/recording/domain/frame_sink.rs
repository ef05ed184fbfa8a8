use thiserror::Error;

use crate::recording::domain::recorder_settings::RecorderSettings;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to spawn encoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder pipe error: {0}")]
    Io(#[from] std::io::Error),
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("encoder exited with {status}: {stderr}")]
    ProcessFailed { status: String, stderr: String },
    #[error("sink is closed")]
    Closed,
}

/// Byte stream that accepts raw frames in presentation order.
///
/// This is the boundary to the external encoder. The recorder writes one
/// whole frame per call and treats anything but a full write as fatal for
/// the session.
pub trait FrameSink: Send {
    /// Writes `bytes` and returns how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, SinkError>;

    /// Ends the stream. Called exactly once per opened sink.
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Opens a fresh sink for each recording session.
pub trait SinkFactory: Send + Sync {
    fn open(&self, settings: &RecorderSettings) -> Result<Box<dyn FrameSink>, SinkError>;
}
