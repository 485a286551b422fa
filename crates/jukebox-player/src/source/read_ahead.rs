//! Fixed-size read-ahead ring placed in front of network streams.
//!
//! The ring is primed to full before the first byte is handed out and topped up whenever it
//! falls below half, smoothing out bursty network delivery. The storage is supplied by the
//! resolver's scratch pool and returned to it when the stage is released.

use std::io;

use super::ByteSource;

pub struct ReadAheadBuffer {
    storage: Vec<u8>,
    head: usize,
    len: usize,
    eof: bool,
    delivered_any: bool,
    underruns: u64,
}

impl ReadAheadBuffer {
    /// Wrap `storage` (its length is the ring size). A zero-length ring passes reads through.
    pub fn new(storage: Vec<u8>) -> Self {
        Self {
            storage,
            head: 0,
            len: 0,
            eof: false,
            delivered_any: false,
            underruns: 0,
        }
    }

    /// Times the ring ran dry after playback had started.
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    pub(crate) fn into_storage(self) -> Vec<u8> {
        self.storage
    }

    pub(super) fn read(&mut self, base: &mut dyn ByteSource, out: &mut [u8]) -> io::Result<usize> {
        if self.storage.is_empty() {
            return base.read(out);
        }
        if out.is_empty() {
            return Ok(0);
        }

        if self.len == 0 && !self.eof {
            if self.delivered_any {
                self.underruns += 1;
                tracing::debug!(underruns = self.underruns, "read-ahead buffer underrun");
            }
            while !self.eof && self.len < self.storage.len() {
                self.fill_once(base)?;
            }
        } else if self.len < self.storage.len() / 2 && !self.eof {
            self.fill_once(base)?;
        }

        if self.len == 0 {
            return Ok(0);
        }

        let cap = self.storage.len();
        let contiguous = (cap - self.head).min(self.len);
        let n = contiguous.min(out.len());
        out[..n].copy_from_slice(&self.storage[self.head..self.head + n]);
        self.head = (self.head + n) % cap;
        self.len -= n;
        self.delivered_any = true;
        Ok(n)
    }

    /// One read from `base` into the free region after the buffered bytes.
    fn fill_once(&mut self, base: &mut dyn ByteSource) -> io::Result<()> {
        let cap = self.storage.len();
        let tail = (self.head + self.len) % cap;
        let free = cap - self.len;
        let span = if tail >= self.head {
            (cap - tail).min(free)
        } else {
            self.head - tail
        };
        if span == 0 {
            return Ok(());
        }
        loop {
            match base.read(&mut self.storage[tail..tail + span]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.len += n;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceChain, SourceStage};
    use crate::test_support::MemorySource;
    use std::io::Read;

    fn payload(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn delivers_bytes_in_order_across_wraps() {
        let data = payload(1000);
        let stage = SourceStage::ReadAhead(ReadAheadBuffer::new(vec![0u8; 64]));
        let base = MemorySource::chunked(data.clone(), 7);
        let mut chain = SourceChain::new(Box::new(base), Some(stage));

        let mut out = Vec::new();
        let mut buf = [0u8; 13];
        loop {
            let n = chain.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, data);
    }

    #[test]
    fn zero_sized_ring_passes_through() {
        let data = payload(50);
        let stage = SourceStage::ReadAhead(ReadAheadBuffer::new(Vec::new()));
        let mut chain = SourceChain::new(Box::new(MemorySource::new(data.clone())), Some(stage));
        let mut out = Vec::new();
        chain.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn counts_underrun_only_after_delivery() {
        let mut ring = ReadAheadBuffer::new(vec![0u8; 8]);
        let mut base = MemorySource::new(payload(16));
        let mut out = [0u8; 8];
        assert_eq!(ring.read(&mut base, &mut out).unwrap(), 8);
        assert_eq!(ring.underruns(), 0);
        assert_eq!(ring.read(&mut base, &mut out).unwrap(), 8);
        assert_eq!(ring.underruns(), 1);
    }

    #[test]
    fn base_errors_propagate() {
        let mut ring = ReadAheadBuffer::new(vec![0u8; 8]);
        let mut base = MemorySource::failing();
        let mut out = [0u8; 4];
        assert!(ring.read(&mut base, &mut out).is_err());
    }
}
