//! ID3v2 stripping stage for local files.
//!
//! On the first read the stage looks for an ID3v2 header, reports the text frames it can decode
//! to the metadata handler, and discards the whole tag so the decoder starts at audio data.
//! Sources without a tag pass through untouched.

use std::io;
use std::sync::Arc;

use super::{ByteSource, MetadataEvent, MetadataHandler, read_fully};

const HEADER_LEN: usize = 10;
/// Tags larger than this are skipped without being parsed.
const MAX_PARSED_TAG: usize = 256 * 1024;
const REPORTED_FRAMES: [&str; 3] = ["TIT2", "TPE1", "TALB"];

pub struct TagStripper {
    locator: String,
    metadata: Arc<dyn MetadataHandler>,
    header_checked: bool,
    /// Bytes read while probing that turned out to be audio.
    carry: Vec<u8>,
    carry_pos: usize,
}

impl TagStripper {
    pub fn new(locator: &str, metadata: Arc<dyn MetadataHandler>) -> Self {
        Self {
            locator: locator.to_string(),
            metadata,
            header_checked: false,
            carry: Vec::new(),
            carry_pos: 0,
        }
    }

    pub(super) fn read(&mut self, base: &mut dyn ByteSource, out: &mut [u8]) -> io::Result<usize> {
        if !self.header_checked {
            self.header_checked = true;
            self.skip_tag(base)?;
        }

        if self.carry_pos < self.carry.len() {
            let n = (self.carry.len() - self.carry_pos).min(out.len());
            out[..n].copy_from_slice(&self.carry[self.carry_pos..self.carry_pos + n]);
            self.carry_pos += n;
            return Ok(n);
        }

        base.read(out)
    }

    fn skip_tag(&mut self, base: &mut dyn ByteSource) -> io::Result<()> {
        let mut header = [0u8; HEADER_LEN];
        let got = read_fully(base, &mut header)?;
        let Some(tag) = parse_header(&header[..got]) else {
            self.carry = header[..got].to_vec();
            return Ok(());
        };

        if tag.body_len <= MAX_PARSED_TAG {
            let mut body = vec![0u8; tag.body_len];
            let got = read_fully(base, &mut body)?;
            body.truncate(got);
            for (key, value) in text_frames(&body, tag.version) {
                self.metadata.on_metadata(&MetadataEvent {
                    locator: self.locator.clone(),
                    key,
                    value,
                });
            }
        } else {
            discard(base, tag.body_len)?;
        }
        tracing::debug!(
            item = %self.locator,
            tag_bytes = tag.body_len + HEADER_LEN,
            "id3 tag skipped"
        );
        Ok(())
    }
}

struct TagHeader {
    version: u8,
    /// Bytes following the 10-byte header, footer included.
    body_len: usize,
}

fn parse_header(header: &[u8]) -> Option<TagHeader> {
    if header.len() < HEADER_LEN || &header[..3] != b"ID3" {
        return None;
    }
    let version = header[3];
    let flags = header[5];
    let size = synchsafe(&header[6..10])?;
    let footer = if flags & 0x10 != 0 { HEADER_LEN } else { 0 };
    Some(TagHeader {
        version,
        body_len: size + footer,
    })
}

/// Decode a 28-bit synchsafe integer (high bit of every byte must be clear).
fn synchsafe(bytes: &[u8]) -> Option<usize> {
    bytes.iter().try_fold(0usize, |acc, b| {
        if b & 0x80 != 0 {
            None
        } else {
            Some((acc << 7) | usize::from(*b))
        }
    })
}

fn discard(base: &mut dyn ByteSource, mut remaining: usize) -> io::Result<()> {
    let mut scratch = [0u8; 4096];
    while remaining > 0 {
        let want = remaining.min(scratch.len());
        let got = read_fully(base, &mut scratch[..want])?;
        if got == 0 {
            break;
        }
        remaining -= got;
    }
    Ok(())
}

/// Walk v2.3/v2.4 frames and decode the reported text frames.
fn text_frames(body: &[u8], version: u8) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + HEADER_LEN <= body.len() {
        let id = &body[pos..pos + 4];
        if id[0] == 0 {
            break; // padding
        }
        let size_bytes = &body[pos + 4..pos + 8];
        let size = if version >= 4 {
            synchsafe(size_bytes)
        } else {
            let raw = [size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]];
            Some(u32::from_be_bytes(raw) as usize)
        };
        let Some(size) = size else { break };
        let start = pos + HEADER_LEN;
        let end = start.saturating_add(size);
        if end > body.len() {
            break;
        }
        let id = String::from_utf8_lossy(id).into_owned();
        if REPORTED_FRAMES.contains(&id.as_str()) {
            if let Some(text) = decode_text(&body[start..end]) {
                out.push((id, text));
            }
        }
        pos = end;
    }
    out
}

fn decode_text(frame: &[u8]) -> Option<String> {
    let (&encoding, data) = frame.split_first()?;
    let text = match encoding {
        0 => data.iter().map(|&b| char::from(b)).collect::<String>(),
        1 | 2 => {
            let (data, big_endian) = match data {
                [0xFF, 0xFE, rest @ ..] => (rest, false),
                [0xFE, 0xFF, rest @ ..] => (rest, true),
                _ => (data, encoding == 2),
            };
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|c| {
                    if big_endian {
                        u16::from_be_bytes([c[0], c[1]])
                    } else {
                        u16::from_le_bytes([c[0], c[1]])
                    }
                })
                .collect();
            String::from_utf16_lossy(&units)
        }
        3 => String::from_utf8_lossy(data).into_owned(),
        _ => return None,
    };
    let text = text.trim_end_matches('\0').trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceChain, SourceStage};
    use crate::test_support::{MemorySource, RecordingMetadata};
    use std::io::Read;

    fn frame(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut f = id.to_vec();
        f.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        f.extend_from_slice(&[0, 0]);
        f.extend_from_slice(payload);
        f
    }

    fn tagged(body: &[u8], audio: &[u8]) -> Vec<u8> {
        let len = body.len();
        let mut data = b"ID3\x03\x00\x00".to_vec();
        data.extend_from_slice(&[
            ((len >> 21) & 0x7f) as u8,
            ((len >> 14) & 0x7f) as u8,
            ((len >> 7) & 0x7f) as u8,
            (len & 0x7f) as u8,
        ]);
        data.extend_from_slice(body);
        data.extend_from_slice(audio);
        data
    }

    fn read_all(chain: &mut SourceChain) -> Vec<u8> {
        let mut out = Vec::new();
        chain.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn strips_tag_and_reports_text_frames() {
        let mut body = frame(b"TIT2", b"\x03Hello");
        body.extend(frame(b"TPE1", b"\x00Band"));
        body.extend(frame(b"APIC", b"\x00ignored"));
        body.extend([0u8; 16]);
        let data = tagged(&body, b"AUDIO");

        let metadata = Arc::new(RecordingMetadata::default());
        let stage = SourceStage::TagStrip(TagStripper::new("/a.mp3", metadata.clone()));
        let mut chain = SourceChain::new(Box::new(MemorySource::new(data)), Some(stage));

        assert_eq!(read_all(&mut chain), b"AUDIO");
        let events = metadata.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].key, "TIT2");
        assert_eq!(events[0].value, "Hello");
        assert_eq!(events[1].value, "Band");
    }

    #[test]
    fn untagged_source_passes_through() {
        let metadata = Arc::new(RecordingMetadata::default());
        let stage = SourceStage::TagStrip(TagStripper::new("/a.mp3", metadata.clone()));
        let data = b"\xFF\xFBplain mp3 frames".to_vec();
        let base = MemorySource::chunked(data.clone(), 3);
        let mut chain = SourceChain::new(Box::new(base), Some(stage));
        assert_eq!(read_all(&mut chain), data);
        assert!(metadata.events().is_empty());
    }

    #[test]
    fn short_source_is_returned_verbatim() {
        let metadata = Arc::new(RecordingMetadata::default());
        let stage = SourceStage::TagStrip(TagStripper::new("/a.mp3", metadata));
        let mut chain = SourceChain::new(Box::new(MemorySource::new(b"ID3".to_vec())), Some(stage));
        assert_eq!(read_all(&mut chain), b"ID3");
    }

    #[test]
    fn synchsafe_rejects_high_bit() {
        assert_eq!(synchsafe(&[0x00, 0x00, 0x02, 0x01]), Some(257));
        assert_eq!(synchsafe(&[0x80, 0x00, 0x00, 0x00]), None);
    }

    #[test]
    fn decode_text_handles_utf16_bom() {
        let payload = [1u8, 0xFF, 0xFE, b'H', 0, b'i', 0, 0, 0];
        assert_eq!(decode_text(&payload), Some("Hi".to_string()));
        assert_eq!(decode_text(&[9, b'x']), None);
    }
}
