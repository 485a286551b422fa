//! Byte sources feeding the decoder.
//!
//! A pipeline's source side is a [`SourceChain`]: a base [`ByteSource`] opened by one of the
//! reader capabilities, optionally fronted by a [`SourceStage`] (ID3 stripping for local files,
//! read-ahead buffering for network streams). The decoder reads through a [`ChainReader`]
//! handle; the pipeline keeps the chain itself so it can release stage and base explicitly,
//! after the decoder is gone.

pub mod http;
pub mod local;
pub mod read_ahead;
pub mod tag;

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use symphonia::core::io::MediaSource;

pub use read_ahead::ReadAheadBuffer;
pub use tag::TagStripper;

/// A readable byte source produced by a reader capability.
pub trait ByteSource: Read + Send {
    /// Release the underlying handle (file, socket). Called exactly once by the chain.
    fn close(&mut self) {}
}

/// Capability: open local resources by path.
pub trait LocalReader: Send + Sync {
    fn open(&self, path: &str) -> io::Result<Box<dyn ByteSource>>;
}

/// Capability: open network streams by URL, reporting inline metadata to `metadata`.
pub trait NetworkReader: Send + Sync {
    fn open(
        &self,
        url: &str,
        metadata: Arc<dyn MetadataHandler>,
    ) -> io::Result<Box<dyn ByteSource>>;
}

/// One inline metadata notification (ICY title, ID3 text frame).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataEvent {
    /// Locator of the item that carried the metadata.
    pub locator: String,
    /// Field name, e.g. `StreamTitle` or `TIT2`.
    pub key: String,
    pub value: String,
}

/// Receiver for inline metadata. Invoked on the controller's execution context.
pub trait MetadataHandler: Send + Sync {
    fn on_metadata(&self, event: &MetadataEvent);
}

/// Metadata handler that only logs.
#[derive(Debug, Default)]
pub struct LogMetadata;

impl MetadataHandler for LogMetadata {
    fn on_metadata(&self, event: &MetadataEvent) {
        tracing::info!(
            item = %event.locator,
            key = %event.key,
            value = %event.value,
            "stream metadata"
        );
    }
}

/// Intermediate stage between the base source and the decoder.
pub enum SourceStage {
    TagStrip(TagStripper),
    ReadAhead(ReadAheadBuffer),
}

impl SourceStage {
    fn read(&mut self, base: &mut dyn ByteSource, out: &mut [u8]) -> io::Result<usize> {
        match self {
            SourceStage::TagStrip(s) => s.read(base, out),
            SourceStage::ReadAhead(s) => s.read(base, out),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SourceStage::TagStrip(_) => "tag-strip",
            SourceStage::ReadAhead(_) => "read-ahead",
        }
    }
}

/// Base source plus optional stage for one pipeline.
pub struct SourceChain {
    stage: Option<SourceStage>,
    base: Option<Box<dyn ByteSource>>,
}

impl SourceChain {
    pub fn new(base: Box<dyn ByteSource>, stage: Option<SourceStage>) -> Self {
        Self {
            stage,
            base: Some(base),
        }
    }

    /// Release the stage, handing back its buffer (if any) for reuse.
    pub fn release_stage(&mut self) -> Option<Vec<u8>> {
        let stage = self.stage.take()?;
        let stage_name = stage.name();
        match stage {
            SourceStage::ReadAhead(buf) => {
                tracing::debug!(
                    stage = stage_name,
                    underruns = buf.underruns(),
                    "source stage released"
                );
                Some(buf.into_storage())
            }
            SourceStage::TagStrip(_) => {
                tracing::debug!(stage = stage_name, "source stage released");
                None
            }
        }
    }

    /// Close and drop the base source. Idempotent.
    pub fn close_base(&mut self) {
        if let Some(mut base) = self.base.take() {
            base.close();
        }
    }
}

impl Read for SourceChain {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let Some(base) = self.base.as_deref_mut() else {
            return Ok(0);
        };
        match self.stage.as_mut() {
            Some(stage) => stage.read(base, out),
            None => base.read(out),
        }
    }
}

/// Shared read handle given to the decoder.
///
/// Reads after the chain has been closed return EOF.
#[derive(Clone)]
pub struct ChainReader {
    chain: Arc<Mutex<SourceChain>>,
}

impl ChainReader {
    pub fn new(chain: Arc<Mutex<SourceChain>>) -> Self {
        Self { chain }
    }
}

impl Read for ChainReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut chain = self
            .chain
            .lock()
            .map_err(|_| io::Error::other("source chain poisoned"))?;
        chain.read(out)
    }
}

impl Seek for ChainReader {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "pipeline sources are not seekable",
        ))
    }
}

impl MediaSource for ChainReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Read until `out` is full or the source reports EOF. Returns bytes read.
pub(crate) fn read_fully(src: &mut dyn ByteSource, out: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < out.len() {
        match src.read(&mut out[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
