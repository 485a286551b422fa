//! Decoder capability and its Symphonia implementation.
//!
//! A decoder is created per item by a [`DecoderFactory`], started against the item's
//! [`ChainReader`], then driven one packet at a time by the pipeline lifecycle. Its
//! [`DecoderScratch`] (the interleaved sample buffer) survives the decoder and is handed to the
//! next decoder of the same [`CodecFamily`].

use std::fmt;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::PipelineError;
use crate::sink::{AudioSink, StreamFormat};
use crate::source::ChainReader;

/// Decoder family selected from a locator's extension or codec hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecFamily {
    Mp3,
    Aac,
    Flac,
    Vorbis,
    Wav,
}

impl CodecFamily {
    /// Map an extension, codec name or MIME type to a family.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let name = name.strip_prefix("audio/").unwrap_or(&name);
        match name {
            "mp3" | "mpeg" | "mpga" | "mp2" => Some(CodecFamily::Mp3),
            "aac" | "m4a" | "mp4" | "aacp" | "adts" => Some(CodecFamily::Aac),
            "flac" | "x-flac" => Some(CodecFamily::Flac),
            "ogg" | "oga" | "vorbis" => Some(CodecFamily::Vorbis),
            "wav" | "wave" | "x-wav" => Some(CodecFamily::Wav),
            _ => None,
        }
    }

    /// Extension handed to the probe as a format hint.
    pub fn extension(self) -> &'static str {
        match self {
            CodecFamily::Mp3 => "mp3",
            CodecFamily::Aac => "aac",
            CodecFamily::Flac => "flac",
            CodecFamily::Vorbis => "ogg",
            CodecFamily::Wav => "wav",
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Decoder working memory, reusable by the next decoder of the same family.
pub struct DecoderScratch {
    family: CodecFamily,
    samples: Option<SampleBuffer<f32>>,
}

impl DecoderScratch {
    pub fn new(family: CodecFamily) -> Self {
        Self {
            family,
            samples: None,
        }
    }

    pub fn family(&self) -> CodecFamily {
        self.family
    }

    /// Interleaved samples the scratch can hold without reallocating.
    pub fn sample_capacity(&self) -> usize {
        self.samples.as_ref().map_or(0, |b| b.capacity())
    }
}

impl fmt::Debug for DecoderScratch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderScratch")
            .field("family", &self.family)
            .field("sample_capacity", &self.sample_capacity())
            .finish()
    }
}

/// Outcome of one unit of decoder work.
#[derive(Debug)]
pub enum StepResult {
    Continue,
    Finished,
    Error(PipelineError),
}

/// Opaque decoder capability.
pub trait Decoder: Send {
    fn family(&self) -> CodecFamily;

    /// Probe `source` and prepare to decode. Returns the format the sink must be bound to.
    fn begin(&mut self, source: ChainReader) -> Result<StreamFormat, PipelineError>;

    /// Decode one packet and write it to `sink`.
    fn step(&mut self, sink: &mut dyn AudioSink) -> StepResult;

    fn is_running(&self) -> bool;

    /// Stop decoding and drop the reader. Idempotent.
    fn stop(&mut self);

    /// Consume the decoder, handing back its working memory.
    fn release(self: Box<Self>) -> Option<DecoderScratch>;
}

/// Capability: build decoders, reusing pooled scratch when offered.
pub trait DecoderFactory: Send + Sync {
    /// Build a decoder for `family`.
    ///
    /// A factory takes `scratch` only when it uses it for the returned decoder; on failure it
    /// is left with the caller.
    fn create(
        &self,
        family: CodecFamily,
        scratch: &mut Option<DecoderScratch>,
    ) -> Result<Box<dyn Decoder>, PipelineError>;
}

/// Factory for [`SymphoniaDecoder`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoders;

impl DecoderFactory for SymphoniaDecoders {
    fn create(
        &self,
        family: CodecFamily,
        scratch: &mut Option<DecoderScratch>,
    ) -> Result<Box<dyn Decoder>, PipelineError> {
        let scratch = match scratch.take_if(|s| s.family == family) {
            Some(s) => s,
            None => DecoderScratch::new(family),
        };
        Ok(Box::new(SymphoniaDecoder {
            scratch,
            active: None,
        }))
    }
}

struct ActiveStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
}

/// Packet-at-a-time decoder backed by Symphonia's default probe and codec registry.
pub struct SymphoniaDecoder {
    scratch: DecoderScratch,
    active: Option<ActiveStream>,
}

impl Decoder for SymphoniaDecoder {
    fn family(&self) -> CodecFamily {
        self.scratch.family
    }

    fn begin(&mut self, source: ChainReader) -> Result<StreamFormat, PipelineError> {
        let mss = MediaSourceStream::new(Box::new(source), Default::default());
        let mut hint = Hint::new();
        hint.with_extension(self.scratch.family.extension());

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PipelineError::DecodeError(format!("probe failed: {e}")))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| PipelineError::DecodeError("no default audio track".to_string()))?;
        let params: CodecParameters = track.codec_params.clone();
        let track_id = track.id;

        let channels = params
            .channels
            .ok_or_else(|| PipelineError::DecodeError("unknown channel layout".to_string()))?
            .count();
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| PipelineError::DecodeError("unknown sample rate".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| PipelineError::DecodeError(format!("no decoder: {e}")))?;

        tracing::debug!(
            family = %self.scratch.family,
            codec = codec_name_from_params(&params).unwrap_or("unknown"),
            rate_hz = sample_rate,
            channels,
            duration_ms = ?duration_ms_from_codec_params(&params),
            "decoder started"
        );

        self.active = Some(ActiveStream {
            format,
            decoder,
            track_id,
        });
        Ok(StreamFormat {
            sample_rate,
            channels,
        })
    }

    fn step(&mut self, sink: &mut dyn AudioSink) -> StepResult {
        let Some(active) = self.active.as_mut() else {
            return StepResult::Finished;
        };

        loop {
            let packet = match active.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return StepResult::Finished;
                }
                Err(SymphoniaError::ResetRequired) => return StepResult::Finished,
                Err(e) => return StepResult::Error(PipelineError::DecodeError(e.to_string())),
            };
            if packet.track_id() != active.track_id {
                continue;
            }

            let decoded = match active.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::debug!(reason = msg, "skipping undecodable packet");
                    return StepResult::Continue;
                }
                Err(e) => return StepResult::Error(PipelineError::DecodeError(e.to_string())),
            };

            let needed = decoded.capacity() * decoded.spec().channels.count();
            let reuse = self
                .scratch
                .samples
                .as_ref()
                .is_some_and(|b| b.capacity() >= needed);
            if !reuse {
                self.scratch.samples = Some(SampleBuffer::<f32>::new(
                    decoded.capacity() as u64,
                    *decoded.spec(),
                ));
            }
            let Some(buf) = self.scratch.samples.as_mut() else {
                return StepResult::Continue;
            };
            buf.copy_interleaved_ref(decoded);

            return match sink.write(buf.samples()) {
                Ok(()) => StepResult::Continue,
                Err(e) => StepResult::Error(PipelineError::DecodeError(format!(
                    "output write failed: {e:#}"
                ))),
            };
        }
    }

    fn is_running(&self) -> bool {
        self.active.is_some()
    }

    fn stop(&mut self) {
        self.active = None;
    }

    fn release(self: Box<Self>) -> Option<DecoderScratch> {
        Some(self.scratch)
    }
}

/// Best-effort duration in milliseconds from codec metadata.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}
