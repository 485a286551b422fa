//! Bounded queue of interleaved samples between the sink's writer and the CPAL callback.
//!
//! The writer (the controller's execution context) blocks when the queue is full, which is the
//! output back-pressure a pipeline step may wait on. The callback never blocks: it takes what is
//! available and fills the rest with silence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub(crate) struct SampleQueue {
    channels: usize,
    max_samples: usize,
    inner: Mutex<Inner>,
    cv: Condvar,
    underruns: AtomicU64,
}

struct Inner {
    samples: VecDeque<f32>,
    closed: bool,
}

/// Queue capacity in samples for `seconds` of audio; non-positive or non-finite values fall back
/// to two seconds.
pub(crate) fn calc_max_buffered_samples(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl SampleQueue {
    pub(crate) fn new(channels: usize, max_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            max_samples: max_samples.max(channels),
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(max_samples),
                closed: false,
            }),
            cv: Condvar::new(),
            underruns: AtomicU64::new(0),
        }
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push samples, blocking while the queue is full. Returns `false` if the queue was closed
    /// before everything was accepted.
    pub(crate) fn push_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            while g.samples.len() >= self.max_samples && !g.closed {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.closed {
                return false;
            }
            let room = self.max_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;
            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Take up to `max_frames` whole frames without blocking.
    pub(crate) fn pop_up_to(&self, max_frames: usize, out: &mut Vec<f32>) -> bool {
        out.clear();
        let mut g = self.lock();
        let take = (g.samples.len() / self.channels).min(max_frames) * self.channels;
        if take == 0 {
            return false;
        }
        out.extend(g.samples.drain(..take));
        drop(g);
        self.cv.notify_all();
        true
    }

    /// Discard everything buffered.
    pub(crate) fn clear(&self) {
        self.lock().samples.clear();
        self.cv.notify_all();
    }

    /// Refuse further writes and wake any blocked writer.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }

    pub(crate) fn reopen(&self) {
        self.lock().closed = false;
    }

    /// Wait until the callback has consumed everything, up to `timeout`.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while g.samples.len() >= self.channels {
            let now = Instant::now();
            if now >= deadline || g.closed {
                return false;
            }
            let (next, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = next;
        }
        true
    }

    pub(crate) fn len_samples(&self) -> usize {
        self.lock().samples.len()
    }

    pub(crate) fn note_underrun(&self) -> u64 {
        self.underruns.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn calc_max_buffered_samples_fallbacks() {
        assert_eq!(calc_max_buffered_samples(48_000, 2, 2.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, -1.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, f32::NAN), 192_000);
    }

    #[test]
    fn pop_takes_whole_frames_only() {
        let q = SampleQueue::new(2, 64);
        assert!(q.push_blocking(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        let mut out = Vec::new();
        assert!(q.pop_up_to(8, &mut out));
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(!q.pop_up_to(8, &mut out));
        assert_eq!(q.len_samples(), 1);
    }

    #[test]
    fn full_queue_blocks_writer_until_popped() {
        let q = Arc::new(SampleQueue::new(1, 4));
        let writer = {
            let q = q.clone();
            thread::spawn(move || q.push_blocking(&[0.0; 10]))
        };
        let mut out = Vec::new();
        let mut received = 0;
        while received < 10 {
            if q.pop_up_to(3, &mut out) {
                received += out.len();
            } else {
                thread::yield_now();
            }
        }
        assert!(writer.join().unwrap());
    }

    #[test]
    fn close_releases_blocked_writer() {
        let q = Arc::new(SampleQueue::new(1, 2));
        let writer = {
            let q = q.clone();
            thread::spawn(move || q.push_blocking(&[0.0; 8]))
        };
        while q.len_samples() < 2 {
            thread::yield_now();
        }
        q.close();
        assert!(!writer.join().unwrap());
    }

    #[test]
    fn wait_drained_times_out_when_nothing_consumes() {
        let q = SampleQueue::new(1, 8);
        assert!(q.push_blocking(&[0.5; 4]));
        assert!(!q.wait_drained(Duration::from_millis(10)));
        q.clear();
        assert!(q.wait_drained(Duration::from_millis(10)));
    }
}
