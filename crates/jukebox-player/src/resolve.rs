//! Item resolution: locator → not-yet-started [`Pipeline`].
//!
//! Local items are opened through the local reader and fronted by the ID3 stripping stage;
//! network items are opened through the network reader and fronted by a read-ahead buffer.
//! The decoder family comes from a `codec=` hint when present, otherwise from the extension.
//!
//! Working memory (read-ahead storage, decoder scratch) lives in a [`ScratchPool`] between
//! items so steady-state playback does not allocate per item.

use std::sync::Arc;

use crate::decode::{CodecFamily, DecoderFactory, DecoderScratch};
use crate::error::PipelineError;
use crate::locator::{Locator, LocatorKind};
use crate::pipeline::{Pipeline, Reclaimed};
use crate::source::{
    LocalReader, MetadataHandler, NetworkReader, ReadAheadBuffer, SourceChain, SourceStage,
    TagStripper,
};

/// Network streams rarely carry a usable extension; most stations serve MP3.
const DEFAULT_NETWORK_FAMILY: CodecFamily = CodecFamily::Mp3;

/// Idle working memory kept between pipelines.
#[derive(Debug, Default)]
pub struct ScratchPool {
    read_ahead: Option<Vec<u8>>,
    decoder: Option<DecoderScratch>,
}

impl ScratchPool {
    /// Read-ahead storage of exactly `size` bytes, reusing the pooled buffer when possible.
    fn take_read_ahead(&mut self, size: usize) -> Vec<u8> {
        match self.read_ahead.take() {
            Some(mut buf) if buf.capacity() >= size => {
                buf.resize(size, 0);
                buf
            }
            _ => vec![0u8; size],
        }
    }

    /// Pooled decoder scratch, if it belongs to `family`.
    fn take_decoder(&mut self, family: CodecFamily) -> Option<DecoderScratch> {
        match self.decoder.take() {
            Some(scratch) if scratch.family() == family => Some(scratch),
            other => {
                self.decoder = other;
                None
            }
        }
    }

    fn put(&mut self, reclaimed: Reclaimed) {
        if let Some(buf) = reclaimed.read_ahead {
            self.read_ahead = Some(buf);
        }
        if let Some(scratch) = reclaimed.decoder {
            self.decoder = Some(scratch);
        }
    }

    /// Bytes currently held (read-ahead storage plus decoder samples).
    pub fn pooled_bytes(&self) -> usize {
        let read_ahead = self.read_ahead.as_ref().map_or(0, |b| b.capacity());
        let decoder = self
            .decoder
            .as_ref()
            .map_or(0, |s| s.sample_capacity() * std::mem::size_of::<f32>());
        read_ahead + decoder
    }

    fn clear(&mut self) -> usize {
        let freed = self.pooled_bytes();
        self.read_ahead = None;
        self.decoder = None;
        freed
    }
}

/// Builds pipelines from locators using the injected reader and decoder capabilities.
pub struct ItemResolver {
    local: Arc<dyn LocalReader>,
    network: Arc<dyn NetworkReader>,
    decoders: Arc<dyn DecoderFactory>,
    read_ahead_bytes: usize,
    pool: ScratchPool,
}

impl ItemResolver {
    pub fn new(
        local: Arc<dyn LocalReader>,
        network: Arc<dyn NetworkReader>,
        decoders: Arc<dyn DecoderFactory>,
        read_ahead_bytes: usize,
    ) -> Self {
        Self {
            local,
            network,
            decoders,
            read_ahead_bytes,
            pool: ScratchPool::default(),
        }
    }

    /// Classify `raw`, open its source and stage, and create its decoder.
    ///
    /// Partially built stages are released before an error is returned.
    pub fn resolve(
        &mut self,
        raw: &str,
        metadata: Arc<dyn MetadataHandler>,
    ) -> Result<Pipeline, PipelineError> {
        let locator = Locator::parse(raw, usize::MAX)
            .map_err(|e| PipelineError::unresolvable(raw, e.to_string()))?;
        let family = select_family(&locator)?;

        let chain = match locator.kind() {
            LocatorKind::Local => {
                let base = self
                    .local
                    .open(locator.local_path())
                    .map_err(|e| PipelineError::unavailable(raw, e))?;
                let stage = SourceStage::TagStrip(TagStripper::new(raw, metadata));
                SourceChain::new(base, Some(stage))
            }
            LocatorKind::Network => {
                let base = self
                    .network
                    .open(raw, metadata)
                    .map_err(|e| PipelineError::unavailable(raw, e))?;
                let storage = self.pool.take_read_ahead(self.read_ahead_bytes);
                let stage = SourceStage::ReadAhead(ReadAheadBuffer::new(storage));
                SourceChain::new(base, Some(stage))
            }
            LocatorKind::Unsupported => {
                return Err(PipelineError::unresolvable(raw, "unsupported scheme"));
            }
        };

        let mut scratch = self.pool.take_decoder(family);
        let created = self.decoders.create(family, &mut scratch);
        // Scratch the factory did not take goes back to the pool.
        self.recycle(Reclaimed {
            read_ahead: None,
            decoder: scratch,
        });
        match created {
            Ok(decoder) => {
                tracing::debug!(item = raw, family = %family, "item resolved");
                Ok(Pipeline::new(locator, family, chain, decoder))
            }
            Err(e) => {
                let mut chain = chain;
                let read_ahead = chain.release_stage();
                chain.close_base();
                self.recycle(Reclaimed {
                    read_ahead,
                    decoder: None,
                });
                Err(e)
            }
        }
    }

    /// Return buffers released by a torn-down pipeline to the pool.
    pub fn recycle(&mut self, reclaimed: Reclaimed) {
        self.pool.put(reclaimed);
    }

    /// Drop all pooled working memory. Returns the bytes released.
    pub fn free_buffers(&mut self) -> usize {
        self.pool.clear()
    }

    pub fn pool(&self) -> &ScratchPool {
        &self.pool
    }
}

fn select_family(locator: &Locator) -> Result<CodecFamily, PipelineError> {
    if let Some(hint) = locator.codec_hint() {
        return CodecFamily::from_name(&hint).ok_or_else(|| {
            PipelineError::unresolvable(locator.as_str(), format!("unknown codec hint: {hint}"))
        });
    }
    let from_ext = locator
        .extension()
        .as_deref()
        .and_then(CodecFamily::from_name);
    match (from_ext, locator.kind()) {
        (Some(family), _) => Ok(family),
        (None, LocatorKind::Network) => Ok(DEFAULT_NETWORK_FAMILY),
        (None, LocatorKind::Local) => Err(PipelineError::unresolvable(
            locator.as_str(),
            match locator.extension() {
                Some(ext) => format!("unsupported extension: {ext}"),
                None => "no extension or codec hint".to_string(),
            },
        )),
        (None, LocatorKind::Unsupported) => Err(PipelineError::unresolvable(
            locator.as_str(),
            "unsupported scheme",
        )),
    }
}
