use std::path::PathBuf;

/// Lifecycle of a recording session.
///
/// `Idle -> Recording -> Draining -> Idle` is the normal path; a sink write
/// failure takes `Recording` or `Draining` through `Faulted` back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Recording,
    Draining,
    Faulted,
}

impl RecorderState {
    /// Whether a move from `self` to `next` is part of the state machine.
    pub fn can_transition_to(self, next: RecorderState) -> bool {
        use RecorderState::*;
        matches!(
            (self, next),
            (Idle, Recording)
                | (Recording, Draining)
                | (Recording, Faulted)
                | (Recording, Idle)
                | (Draining, Idle)
                | (Draining, Faulted)
                | (Faulted, Idle)
        )
    }
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderState::Idle => write!(f, "idle"),
            RecorderState::Recording => write!(f, "recording"),
            RecorderState::Draining => write!(f, "draining"),
            RecorderState::Faulted => write!(f, "faulted"),
        }
    }
}

/// Notifications published while sessions run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    Started { output_path: PathBuf },
    /// Stop was requested with frames still queued.
    Draining { queued: usize },
    /// The sink was closed after the session ended normally or by fault.
    Finished { frames_written: u64 },
    Faulted { reason: String, frames_discarded: usize },
    /// A forced restart discarded the session's queue.
    Cancelled { frames_discarded: usize },
}
