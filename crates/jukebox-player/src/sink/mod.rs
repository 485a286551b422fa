//! Output sinks: where decoded interleaved `f32` samples go.
//!
//! The process has one sink (the output device). It is owned by the pipeline lifecycle and
//! lent to whichever pipeline is active; `begin` rebinds it to a new stream format.

pub mod cpal_sink;
pub mod device;
mod output;
mod resample;
mod sample_queue;

use anyhow::Result;

pub use cpal_sink::CpalSink;

/// Format of the decoded stream a pipeline is about to write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

/// Capability: accept decoded audio for one pipeline at a time.
pub trait AudioSink: Send {
    /// Prepare for a new stream. Called once per pipeline start.
    fn begin(&mut self, format: StreamFormat) -> Result<()>;

    /// Write interleaved samples. May block briefly on back-pressure.
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Hold or resume output without discarding buffered audio.
    fn set_paused(&mut self, _paused: bool) {}

    /// Let already-buffered audio play out (natural end of an item).
    fn drain(&mut self) {}

    /// Drop buffered audio. Safe to call when idle.
    fn stop(&mut self);
}

/// Sink that discards everything; used for dry runs without an output device.
#[derive(Debug, Default)]
pub struct NullSink {
    format: Option<StreamFormat>,
    samples_written: u64,
}

impl NullSink {
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl AudioSink for NullSink {
    fn begin(&mut self, format: StreamFormat) -> Result<()> {
        tracing::debug!(
            rate_hz = format.sample_rate,
            channels = format.channels,
            "null sink bound"
        );
        self.format = Some(format);
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    fn stop(&mut self) {
        self.format = None;
    }
}
