//! Error taxonomy for the playback core.
//!
//! Queue errors surface to producers and are always retryable. Pipeline errors never leave the
//! controller's tick loop; they are logged and the offending item is discarded.

use thiserror::Error;

/// Failures returned by [`crate::queue::BoundedItemQueue`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Every usable slot is occupied.
    #[error("queue full")]
    Full,
    /// The queue lock could not be acquired within the configured wait.
    #[error("queue lock not acquired in time")]
    Timeout,
    /// The locator exceeds the configured maximum length.
    #[error("locator too long: {len} > {max}")]
    LocatorTooLong { len: usize, max: usize },
    /// The locator is empty or whitespace.
    #[error("empty locator")]
    EmptyLocator,
    /// Consumption is held while the controller completes a reset.
    #[error("queue held for reset")]
    Held,
}

/// Failures raised while building, starting or stepping a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unknown scheme, extension, or codec hint.
    #[error("unresolvable item {locator}: {reason}")]
    UnresolvableItem { locator: String, reason: String },
    /// A reader, decoder, or output could not be opened.
    #[error("resource unavailable for {locator}: {source}")]
    ResourceUnavailable {
        locator: String,
        #[source]
        source: anyhow::Error,
    },
    /// Mid-stream read or decode failure.
    #[error("decode error: {0}")]
    DecodeError(String),
    /// `start` was called while another pipeline was still active.
    #[error("a pipeline is already active")]
    AlreadyActive,
}

impl PipelineError {
    pub(crate) fn unresolvable(locator: &str, reason: impl Into<String>) -> Self {
        PipelineError::UnresolvableItem {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(locator: &str, source: impl Into<anyhow::Error>) -> Self {
        PipelineError::ResourceUnavailable {
            locator: locator.to_string(),
            source: source.into(),
        }
    }
}

/// Failures of the controller's control surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The end-of-queue handler was requested twice for the same drain.
    #[error("end-of-queue handler already fired for drain {drain}")]
    CallbackAlreadyFired { drain: u64 },
    /// The execution context is gone; commands can no longer be delivered.
    #[error("controller worker has shut down")]
    WorkerGone,
}
