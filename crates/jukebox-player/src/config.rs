use std::time::Duration;

use serde::Deserialize;

/// Output tuning shared by the sink's resample and callback stages.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration for the output queue.
    pub buffer_seconds: f32,
    /// Linear output gain applied in the callback.
    pub gain: f32,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
            gain: 0.125,
        }
    }
}

/// Sizing and timing knobs for the queue and the controller loop.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of items the queue can hold.
    pub queue_capacity: usize,
    /// Maximum locator length in bytes, checked at enqueue.
    pub max_locator_len: usize,
    /// Bounded wait for the queue lock.
    pub lock_timeout_ms: u64,
    /// How long the loop waits for commands when there is nothing to do.
    pub idle_wait_ms: u64,
    /// How long the loop waits for commands per tick while paused.
    pub paused_wait_ms: u64,
    /// Size of the read-ahead buffer placed in front of network streams.
    pub read_ahead_bytes: usize,
    /// Resolve/start failures in a row before the loop backs off.
    pub max_consecutive_failures: u32,
    /// Backoff applied once the failure cap is reached.
    pub failure_backoff_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            max_locator_len: 256,
            lock_timeout_ms: 20,
            idle_wait_ms: 50,
            paused_wait_ms: 20,
            read_ahead_bytes: 6 * 1024,
            max_consecutive_failures: 8,
            failure_backoff_ms: 500,
        }
    }
}

impl ControllerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms.max(1))
    }

    pub fn paused_wait(&self) -> Duration {
        Duration::from_millis(self.paused_wait_ms.max(1))
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}
