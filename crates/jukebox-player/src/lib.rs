pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod locator;
pub mod pipeline;
pub mod queue;
pub mod resolve;
pub mod sink;
pub mod source;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{ControllerThread, ControllerWorker, EndOfQueueHandler, PlaybackController};
pub use error::{ControlError, PipelineError, QueueError};
