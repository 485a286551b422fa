//! Pipeline ownership and lifecycle.
//!
//! A [`Pipeline`] is one item's source chain plus its decoder. [`PipelineLifecycle`] holds at
//! most one of them, binds it to the process-wide sink, steps it, and is the single release
//! path. Release always runs in reverse construction order: decoder, then stage, then base
//! source.

use std::sync::{Arc, Mutex, PoisonError};

use crate::decode::{CodecFamily, Decoder, DecoderScratch};
use crate::error::PipelineError;
use crate::locator::Locator;
use crate::sink::AudioSink;
use crate::source::{ChainReader, SourceChain};

pub use crate::decode::StepResult;

/// Buffers handed back by a released pipeline for reuse by the resolver.
#[derive(Debug, Default)]
pub struct Reclaimed {
    pub read_ahead: Option<Vec<u8>>,
    pub decoder: Option<DecoderScratch>,
}

impl Reclaimed {
    fn merge(&mut self, other: Reclaimed) {
        if other.read_ahead.is_some() {
            self.read_ahead = other.read_ahead;
        }
        if other.decoder.is_some() {
            self.decoder = other.decoder;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read_ahead.is_none() && self.decoder.is_none()
    }
}

/// A constructed pipeline for one item.
pub struct Pipeline {
    // Declared first: dropped (and released) before the chain.
    decoder: Option<Box<dyn Decoder>>,
    chain: Arc<Mutex<SourceChain>>,
    locator: Locator,
    family: CodecFamily,
}

impl Pipeline {
    pub fn new(
        locator: Locator,
        family: CodecFamily,
        chain: SourceChain,
        decoder: Box<dyn Decoder>,
    ) -> Self {
        Self {
            decoder: Some(decoder),
            chain: Arc::new(Mutex::new(chain)),
            locator,
            family,
        }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn family(&self) -> CodecFamily {
        self.family
    }

    /// Stop and release the decoder, then the stage, then the base source. Idempotent.
    pub fn release(&mut self) -> Reclaimed {
        let mut reclaimed = Reclaimed::default();
        if let Some(mut decoder) = self.decoder.take() {
            if decoder.is_running() {
                decoder.stop();
            }
            reclaimed.decoder = decoder.release();
        }
        let mut chain = self.chain.lock().unwrap_or_else(PoisonError::into_inner);
        reclaimed.read_ahead = chain.release_stage();
        chain.close_base();
        reclaimed
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Owner of the single active pipeline and the output sink.
pub struct PipelineLifecycle {
    active: Option<Pipeline>,
    sink: Box<dyn AudioSink>,
    reclaimed: Reclaimed,
}

impl PipelineLifecycle {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            active: None,
            sink,
            reclaimed: Reclaimed::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_locator(&self) -> Option<&Locator> {
        self.active.as_ref().map(Pipeline::locator)
    }

    /// Start `pipeline`: begin decoding its source and bind the sink to the decoded format.
    ///
    /// Fails with [`PipelineError::AlreadyActive`] if a pipeline is active. On any failure the
    /// offered pipeline is released before returning.
    pub fn start(&mut self, mut pipeline: Pipeline) -> Result<(), PipelineError> {
        if self.active.is_some() {
            self.stash(pipeline.release());
            return Err(PipelineError::AlreadyActive);
        }

        let reader = ChainReader::new(pipeline.chain.clone());
        let begun = match pipeline.decoder.as_mut() {
            Some(decoder) => decoder.begin(reader),
            None => Err(PipelineError::DecodeError(
                "pipeline was already released".to_string(),
            )),
        };
        let format = match begun {
            Ok(format) => format,
            Err(e) => {
                self.stash(pipeline.release());
                return Err(e);
            }
        };

        if let Err(e) = self.sink.begin(format) {
            let locator = pipeline.locator.to_string();
            self.stash(pipeline.release());
            return Err(PipelineError::unavailable(&locator, e.context("output sink")));
        }

        tracing::info!(
            item = %pipeline.locator,
            family = %pipeline.family,
            rate_hz = format.sample_rate,
            channels = format.channels,
            "pipeline started"
        );
        self.active = Some(pipeline);
        Ok(())
    }

    /// One unit of decoder work. `Finished` when nothing is active.
    pub fn step(&mut self) -> StepResult {
        let Some(decoder) = self.active.as_mut().and_then(|p| p.decoder.as_mut()) else {
            return StepResult::Finished;
        };
        decoder.step(self.sink.as_mut())
    }

    /// Hold or resume output of the active pipeline.
    pub fn set_paused(&mut self, paused: bool) {
        self.sink.set_paused(paused);
    }

    /// Natural end: let buffered output play out, then tear down.
    pub fn finish(&mut self) {
        if self.active.is_some() {
            self.sink.drain();
        }
        self.teardown();
    }

    /// Release the active pipeline. No-op when idle.
    pub fn teardown(&mut self) {
        let Some(mut pipeline) = self.active.take() else {
            return;
        };
        let reclaimed = pipeline.release();
        self.sink.stop();
        tracing::debug!(item = %pipeline.locator, "pipeline torn down");
        self.stash(reclaimed);
    }

    /// Buffers released since the last call, for the resolver's pool.
    pub fn take_reclaimed(&mut self) -> Reclaimed {
        std::mem::take(&mut self.reclaimed)
    }

    fn stash(&mut self, reclaimed: Reclaimed) {
        self.reclaimed.merge(reclaimed);
    }
}

impl Drop for PipelineLifecycle {
    fn drop(&mut self) {
        self.teardown();
    }
}
