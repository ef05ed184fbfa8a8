//! Converts elapsed wall time into the number of output frames owed.

use std::time::Duration;

/// Output frames due after `elapsed` at `fps`, given `already_emitted`.
///
/// `floor(elapsed * fps) - already_emitted`, clamped at zero when the caller
/// is ahead of schedule. A non-positive or non-finite `fps` owes nothing.
pub fn frames_due(elapsed: Duration, fps: f64, already_emitted: u64) -> u64 {
    if !(fps.is_finite() && fps > 0.0) {
        return 0;
    }
    let owed = (elapsed.as_secs_f64() * fps).floor() as u64;
    owed.saturating_sub(already_emitted)
}

/// Duration of one output frame. Saturates at `Duration::MAX` for rates too
/// low to express.
pub fn frame_period(fps: f64) -> Duration {
    if !(fps.is_finite() && fps > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::MAX)
}

/// Playback length of `frames` output frames. Saturates like
/// [`frame_period`].
pub fn recorded_duration(frames: u64, fps: f64) -> Duration {
    if !(fps.is_finite() && fps > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(frames as f64 / fps).unwrap_or(Duration::MAX)
}

/// Whether one frame period at `fps` fits in a `Duration`.
pub fn is_representable_fps(fps: f64) -> bool {
    fps.is_finite() && fps > 0.0 && Duration::try_from_secs_f64(1.0 / fps).is_ok()
}

/// Frame timeline of one recording session.
///
/// The first accepted frame anchors the timeline: it is the picture for
/// presentation time zero and is always emitted. Frame `k` after it is owed
/// once `k / fps` seconds have elapsed since the anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    fps: f64,
}

impl Timeline {
    pub fn new(fps: f64) -> Self {
        Self { fps }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Frames owed now, with `frames_added` frames (anchor included) already
    /// queued. Zero before the anchor exists.
    pub fn due(&self, elapsed: Duration, frames_added: u64) -> u64 {
        match frames_added {
            0 => 0,
            n => frames_due(elapsed, self.fps, n - 1),
        }
    }

    /// Queue entries one incoming frame expands into: every frame owed, and
    /// never fewer than one so a fast producer is not starved.
    pub fn replication_count(&self, elapsed: Duration, frames_added: u64) -> u64 {
        self.due(elapsed, frames_added).max(1)
    }
}
