use std::path::PathBuf;

use thiserror::Error;

use crate::recording::domain::frame_sink::SinkError;
use crate::shared::pixel_format::PixelFormat;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("recording already started")]
    AlreadyRecording,
    #[error("previous recording is still processing {queued} frames")]
    PreviousSessionBusy { queued: usize },
    #[error("output path is not set")]
    InvalidOutputPath,
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("output file {0} already exists and overwriting is disabled")]
    OutputExistsNoOverwrite(PathBuf),
    #[error("failed to open encoder sink: {0}")]
    SinkOpenFailure(#[source] SinkError),
    #[error("not recording")]
    NotRecording,
    #[error("encoder sink is not open")]
    SinkUnavailable,
    #[error("input frame has no pixel data")]
    UnallocatedInput,
    #[error("frame is {width}x{height} {format}, recorder expects {expected_width}x{expected_height} {expected_format}")]
    FrameMismatch {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected_width: u32,
        expected_height: u32,
        expected_format: PixelFormat,
    },
    #[error("failed to spawn writer thread: {0}")]
    WriterSpawnFailure(#[source] std::io::Error),
    #[error("queue reported frames but none could be consumed")]
    QueueConsumeFailure,
    #[error("failed to write frame to encoder: {0}")]
    SinkWriteFailure(#[source] SinkError),
}
