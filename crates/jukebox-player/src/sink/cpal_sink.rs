//! CPAL-backed output sink.
//!
//! The CPAL stream lives on a dedicated output thread (streams are not `Send` on every host);
//! the sink talks to it through a [`SampleQueue`]. The stream is kept open across items of the
//! same format and rebuilt when the format changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use super::device;
use super::output::{self, OutputOptions};
use super::resample::StreamResampler;
use super::sample_queue::{SampleQueue, calc_max_buffered_samples};
use super::{AudioSink, StreamFormat};
use crate::config::PlaybackConfig;

pub struct CpalSink {
    device_name: Option<String>,
    config: PlaybackConfig,
    paused: Arc<AtomicBool>,
    output: Option<OutputThread>,
    resampler: Option<StreamResampler>,
}

impl CpalSink {
    /// `device_name` is a case-insensitive substring; `None` picks the host default.
    pub fn new(device_name: Option<String>, config: PlaybackConfig) -> Self {
        Self {
            device_name,
            config,
            paused: Arc::new(AtomicBool::new(false)),
            output: None,
            resampler: None,
        }
    }

    fn drain_timeout(&self) -> Duration {
        let buffered = Duration::from_secs_f32(self.config.buffer_seconds.clamp(0.0, 30.0));
        buffered + Duration::from_secs(1)
    }
}

impl AudioSink for CpalSink {
    fn begin(&mut self, format: StreamFormat) -> Result<()> {
        self.paused.store(false, Ordering::Relaxed);

        let reusable = self
            .output
            .as_ref()
            .is_some_and(|o| o.source_format == format);
        if reusable {
            if let Some(out) = &self.output {
                out.queue.clear();
                out.queue.reopen();
            }
            if let Some(rs) = self.resampler.as_mut() {
                rs.reset();
            }
            return Ok(());
        }

        self.resampler = None;
        self.output = None;
        let out = OutputThread::spawn(
            self.device_name.clone(),
            format,
            self.config.clone(),
            self.paused.clone(),
        )?;
        if out.device_rate != format.sample_rate {
            tracing::info!(
                from_hz = format.sample_rate,
                to_hz = out.device_rate,
                "resampling"
            );
            self.resampler = Some(StreamResampler::new(
                format.sample_rate,
                out.device_rate,
                format.channels,
                self.config.chunk_frames,
            )?);
        }
        self.output = Some(out);
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let Some(out) = self.output.as_ref() else {
            bail!("output not started");
        };
        let data = match self.resampler.as_mut() {
            Some(rs) => rs.process(samples)?,
            None => samples,
        };
        if !out.queue.push_blocking(data) {
            bail!("output closed");
        }
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    fn drain(&mut self) {
        let timeout = self.drain_timeout();
        let Some(out) = self.output.as_ref() else {
            return;
        };
        if let Some(rs) = self.resampler.as_mut() {
            match rs.flush() {
                Ok(tail) => {
                    out.queue.push_blocking(tail);
                }
                Err(e) => tracing::warn!(error = %e, "resampler flush failed"),
            }
        }
        if !out.queue.wait_drained(timeout) {
            tracing::warn!(
                left_samples = out.queue.len_samples(),
                "output did not drain in time"
            );
        }
    }

    fn stop(&mut self) {
        self.paused.store(false, Ordering::Relaxed);
        if let Some(out) = &self.output {
            out.queue.clear();
        }
        if let Some(rs) = self.resampler.as_mut() {
            rs.reset();
        }
    }
}

/// Thread owning one CPAL stream. Dropping it stops the stream and joins the thread.
struct OutputThread {
    queue: Arc<SampleQueue>,
    source_format: StreamFormat,
    device_rate: u32,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl OutputThread {
    fn spawn(
        device_name: Option<String>,
        format: StreamFormat,
        config: PlaybackConfig,
        paused: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(u32, Arc<SampleQueue>)>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("jukebox-output".to_string())
            .spawn(move || {
                let stream = match open_stream(device_name.as_deref(), format, &config, paused) {
                    Ok((stream, rate, queue)) => {
                        let _ = ready_tx.send(Ok((rate, queue)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("output stream closed");
            })
            .context("spawn output thread")?;

        let (device_rate, queue) = ready_rx
            .recv()
            .map_err(|_| anyhow!("output thread exited before opening a stream"))??;

        Ok(Self {
            queue,
            source_format: format,
            device_rate,
            stop_tx,
            handle: Some(handle),
        })
    }
}

impl Drop for OutputThread {
    fn drop(&mut self) {
        self.queue.close();
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn open_stream(
    device_name: Option<&str>,
    format: StreamFormat,
    config: &PlaybackConfig,
    paused: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32, Arc<SampleQueue>)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device_name)?;
    let supported = device::pick_output_config(&device, Some(format.sample_rate))?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buf;
    }
    let rate = stream_config.sample_rate;

    let max_samples = calc_max_buffered_samples(rate, format.channels, config.buffer_seconds);
    let queue = Arc::new(SampleQueue::new(format.channels, max_samples));
    let stream = output::build_output_stream(
        &device,
        &stream_config,
        supported.sample_format(),
        &queue,
        OutputOptions {
            refill_max_frames: config.refill_max_frames,
            gain: config.gain,
            paused,
        },
    )?;
    stream.play().context("start output stream")?;

    tracing::info!(
        device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
        rate_hz = rate,
        channels_out = stream_config.channels,
        sample_format = ?supported.sample_format(),
        "output stream opened"
    );
    Ok((stream, rate, queue))
}
