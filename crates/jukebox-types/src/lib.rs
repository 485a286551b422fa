use serde::{Deserialize, Serialize};

/// Controller-level playback state.
///
/// Exactly one state holds at a time. The state is owned by the controller's execution
/// context; other threads only observe it.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing is playing and the loop does not consume the queue.
    #[default]
    Stopped,
    /// The loop consumes the queue and steps the active pipeline.
    Playing,
    /// The active pipeline is kept alive but not stepped.
    Paused,
    /// The active pipeline is torn down on the next tick, then playback continues.
    Skipping,
    /// Queue was cleared; the active pipeline is torn down on the next tick.
    Resetting,
}

impl PipelineState {
    /// Compact encoding used for lock-free state publication.
    pub fn as_u8(self) -> u8 {
        match self {
            PipelineState::Stopped => 0,
            PipelineState::Playing => 1,
            PipelineState::Paused => 2,
            PipelineState::Skipping => 3,
            PipelineState::Resetting => 4,
        }
    }

    /// Inverse of [`PipelineState::as_u8`]. Unknown values map to `Stopped`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Playing,
            2 => PipelineState::Paused,
            3 => PipelineState::Skipping,
            4 => PipelineState::Resetting,
            _ => PipelineState::Stopped,
        }
    }
}

/// Reason why the most recent pipeline ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of stream/file.
    Eof,
    /// Resolve, decode, or output error interrupted playback.
    Error,
    /// The item was skipped by a control request.
    Skipped,
    /// Playback was cancelled by stop-and-clear.
    Stopped,
}

/// Point-in-time view of the controller, safe to hand to UI collaborators.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerStatus {
    /// Current controller state.
    pub state: PipelineState,
    /// Locator of the item owned by the active pipeline.
    pub now_playing: Option<String>,
    /// Number of items waiting in the queue.
    pub queued: usize,
    /// Most recent inline title (ICY `StreamTitle` or ID3 `TIT2`).
    pub stream_title: Option<String>,
    /// How the previous pipeline ended.
    pub end_reason: Option<PlaybackEndReason>,
    /// Resolve/start failures since the last successful start.
    pub consecutive_failures: u32,
    /// Pipelines started since the controller was created.
    pub items_started: u64,
}
