pub const DEFAULT_OUTPUT_PATH: &str = "output.mp4";
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_FPS: f64 = 30.0;
pub const DEFAULT_BITRATE_KBPS: u32 = 20_000;
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
pub const DEFAULT_EXTRA_OUTPUT_ARGS: &str = "-pix_fmt yuv420p -vsync 1 -g 1";
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

/// Upper bound on a single writer wait, so clock changes and wake-ups
/// are noticed even when no message arrives.
pub const WRITER_POLL_INTERVAL_MS: u64 = 5;

/// Poll interval while waiting for the encoder process to exit under a
/// close timeout.
pub const CLOSE_POLL_INTERVAL_MS: u64 = 20;

/// Bytes of encoder stderr kept for error reports.
pub const STDERR_TAIL_BYTES: usize = 4096;

/// Undelivered recorder events kept before new ones are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
