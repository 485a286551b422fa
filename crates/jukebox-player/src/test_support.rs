//! In-memory readers, decoders and sinks for unit tests.
//!
//! Fake decoders interpret their source bytes as a script: each `.` is one successful step,
//! `!` is a step error, and a source starting with `fail` refuses to begin.

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use crate::decode::{CodecFamily, Decoder, DecoderFactory, DecoderScratch, StepResult};
use crate::error::PipelineError;
use crate::sink::{AudioSink, StreamFormat};
use crate::source::{
    ByteSource, ChainReader, LocalReader, MetadataEvent, MetadataHandler, NetworkReader,
};

/// Ordered record of lifecycle events shared by fakes.
#[derive(Clone, Debug, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

/// Observes how often a [`MemorySource`] was closed.
#[derive(Clone, Debug, Default)]
pub(crate) struct SourceProbe {
    closes: Arc<AtomicUsize>,
    log: Option<EventLog>,
}

impl SourceProbe {
    pub(crate) fn with_log(log: EventLog) -> Self {
        Self {
            closes: Arc::default(),
            log: Some(log),
        }
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub(crate) struct MemorySource {
    data: Cursor<Vec<u8>>,
    chunk: usize,
    fail: bool,
    probe: Option<SourceProbe>,
}

impl MemorySource {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self::chunked(data, usize::MAX)
    }

    /// Delivers at most `chunk` bytes per read.
    pub(crate) fn chunked(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data: Cursor::new(data),
            chunk: chunk.max(1),
            fail: false,
            probe: None,
        }
    }

    /// Every read fails.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn with_probe(mut self, probe: SourceProbe) -> Self {
        self.probe = Some(probe);
        self
    }
}

impl Read for MemorySource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::other("scripted read failure"));
        }
        let n = out.len().min(self.chunk);
        self.data.read(&mut out[..n])
    }
}

impl ByteSource for MemorySource {
    fn close(&mut self) {
        if let Some(probe) = &self.probe {
            probe.closes.fetch_add(1, Ordering::SeqCst);
            if let Some(log) = &probe.log {
                log.push("source:close");
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingMetadata {
    events: Mutex<Vec<MetadataEvent>>,
}

impl RecordingMetadata {
    pub(crate) fn events(&self) -> Vec<MetadataEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl MetadataHandler for RecordingMetadata {
    fn on_metadata(&self, event: &MetadataEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Local reader serving a fixed set of in-memory files.
pub(crate) struct FakeLocalReader {
    files: HashMap<String, Vec<u8>>,
    log: EventLog,
}

impl FakeLocalReader {
    pub(crate) fn new(log: EventLog) -> Self {
        Self {
            files: HashMap::new(),
            log,
        }
    }

    pub(crate) fn with_file(mut self, path: &str, data: &[u8]) -> Self {
        self.files.insert(path.to_string(), data.to_vec());
        self
    }
}

impl LocalReader for FakeLocalReader {
    fn open(&self, path: &str) -> io::Result<Box<dyn ByteSource>> {
        self.log.push("local:open");
        let data = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))?;
        Ok(Box::new(
            MemorySource::new(data).with_probe(SourceProbe::with_log(self.log.clone())),
        ))
    }
}

/// Network reader that serves `..` for any URL unless a stream was registered, and optionally
/// reports a stream title on open.
pub(crate) struct FakeNetworkReader {
    streams: HashMap<String, Vec<u8>>,
    title: Option<String>,
    log: EventLog,
}

impl FakeNetworkReader {
    pub(crate) fn new(log: EventLog) -> Self {
        Self {
            streams: HashMap::new(),
            title: None,
            log,
        }
    }

    pub(crate) fn with_stream(mut self, url: &str, data: &[u8]) -> Self {
        self.streams.insert(url.to_string(), data.to_vec());
        self
    }

    pub(crate) fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
}

impl NetworkReader for FakeNetworkReader {
    fn open(
        &self,
        url: &str,
        metadata: Arc<dyn MetadataHandler>,
    ) -> io::Result<Box<dyn ByteSource>> {
        self.log.push("network:open");
        if let Some(title) = &self.title {
            metadata.on_metadata(&MetadataEvent {
                locator: url.to_string(),
                key: "StreamTitle".to_string(),
                value: title.clone(),
            });
        }
        let data = self
            .streams
            .get(url)
            .cloned()
            .unwrap_or_else(|| b"..".to_vec());
        Ok(Box::new(
            MemorySource::new(data).with_probe(SourceProbe::with_log(self.log.clone())),
        ))
    }
}

pub(crate) struct FakeDecoder {
    family: CodecFamily,
    log: EventLog,
    script: Vec<u8>,
    pos: usize,
    running: bool,
}

impl FakeDecoder {
    pub(crate) fn new(family: CodecFamily, log: EventLog) -> Self {
        Self {
            family,
            log,
            script: Vec::new(),
            pos: 0,
            running: false,
        }
    }
}

impl Decoder for FakeDecoder {
    fn family(&self) -> CodecFamily {
        self.family
    }

    fn begin(&mut self, mut source: ChainReader) -> Result<StreamFormat, PipelineError> {
        self.log.push("decoder:begin");
        let mut script = Vec::new();
        source
            .read_to_end(&mut script)
            .map_err(|e| PipelineError::DecodeError(e.to_string()))?;
        if script.starts_with(b"fail") {
            return Err(PipelineError::DecodeError("scripted begin failure".to_string()));
        }
        self.script = script;
        self.running = true;
        Ok(StreamFormat {
            sample_rate: 8_000,
            channels: 1,
        })
    }

    fn step(&mut self, sink: &mut dyn AudioSink) -> StepResult {
        loop {
            let Some(&op) = self.script.get(self.pos) else {
                return StepResult::Finished;
            };
            self.pos += 1;
            match op {
                b'.' => {
                    return match sink.write(&[0.0; 4]) {
                        Ok(()) => StepResult::Continue,
                        Err(e) => StepResult::Error(PipelineError::DecodeError(e.to_string())),
                    };
                }
                b'!' => {
                    return StepResult::Error(PipelineError::DecodeError(
                        "scripted step failure".to_string(),
                    ));
                }
                _ => continue,
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn stop(&mut self) {
        self.log.push("decoder:stop");
        self.running = false;
    }

    fn release(self: Box<Self>) -> Option<DecoderScratch> {
        self.log.push("decoder:release");
        Some(DecoderScratch::new(self.family))
    }
}

pub(crate) struct FakeDecoders {
    log: EventLog,
    fail_next: AtomicBool,
    scratch_offers: AtomicUsize,
}

impl FakeDecoders {
    pub(crate) fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_next: AtomicBool::new(false),
            scratch_offers: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn scratch_offers(&self) -> usize {
        self.scratch_offers.load(Ordering::SeqCst)
    }
}

impl DecoderFactory for FakeDecoders {
    fn create(
        &self,
        family: CodecFamily,
        scratch: &mut Option<DecoderScratch>,
    ) -> Result<Box<dyn Decoder>, PipelineError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::ResourceUnavailable {
                locator: family.to_string(),
                source: anyhow!("scripted decoder shortage"),
            });
        }
        if scratch.take().is_some() {
            self.scratch_offers.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Box::new(FakeDecoder::new(family, self.log.clone())))
    }
}

pub(crate) struct FakeSink {
    log: EventLog,
    fail_begin: bool,
    samples: Arc<AtomicUsize>,
}

impl FakeSink {
    pub(crate) fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_begin: false,
            samples: Arc::default(),
        }
    }

    pub(crate) fn failing(log: EventLog) -> Self {
        Self {
            fail_begin: true,
            ..Self::new(log)
        }
    }
}

impl AudioSink for FakeSink {
    fn begin(&mut self, _format: StreamFormat) -> Result<()> {
        if self.fail_begin {
            return Err(anyhow!("no output device"));
        }
        self.log.push("sink:begin");
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.samples.fetch_add(samples.len(), Ordering::SeqCst);
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        self.log.push(if paused { "sink:pause" } else { "sink:resume" });
    }

    fn drain(&mut self) {
        self.log.push("sink:drain");
    }

    fn stop(&mut self) {
        self.log.push("sink:stop");
    }
}

/// Minimal 16-bit PCM WAV file.
pub(crate) fn wav_bytes(rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * u32::from(block_align)).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
