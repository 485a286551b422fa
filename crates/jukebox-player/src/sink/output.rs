//! CPAL output stream and its real-time callback.
//!
//! The callback:
//! - refills a small local buffer from the [`SampleQueue`] without blocking
//! - outputs silence while paused, leaving the queue untouched
//! - applies gain and basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use super::sample_queue::SampleQueue;

/// Callback settings.
#[derive(Clone, Debug)]
pub(crate) struct OutputOptions {
    /// Maximum frames pulled from the queue per refill.
    pub refill_max_frames: usize,
    /// Linear gain applied to every sample.
    pub gain: f32,
    /// When `true` the callback outputs silence and does not drain the queue.
    pub paused: Arc<AtomicBool>,
}

/// Build a CPAL output stream that plays interleaved samples (already at the device rate)
/// from `queue`.
pub(crate) fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    opts: OutputOptions,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, opts),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, opts),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, opts),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, opts),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    opts: OutputOptions,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (config.channels as usize).max(1);
    let refill_max_frames = opts.refill_max_frames.max(1);
    let gain = opts.gain;
    let paused = opts.paused;
    let queue = queue.clone();

    let mut st = MappingState {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::with_capacity(refill_max_frames * queue.channels()),
    };

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if paused.load(Ordering::Relaxed) {
                fill_silence(data);
                return;
            }

            let frames = data.len() / channels_out;
            for frame in 0..frames {
                if st.pos >= st.src.len() {
                    st.pos = 0;
                    if !queue.pop_up_to(refill_max_frames, &mut st.src) {
                        if frame > 0 {
                            let count = queue.note_underrun();
                            if count.is_power_of_two() {
                                tracing::debug!(underruns = count, "output underrun");
                            }
                        }
                        fill_silence(&mut data[frame * channels_out..]);
                        return;
                    }
                }
                for ch in 0..channels_out {
                    let sample = next_sample_mapped(&mut st, channels_out, ch) * gain;
                    data[frame * channels_out + ch] =
                        <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Silence in the device format (the midpoint for unsigned formats).
fn fill_silence<T: cpal::Sample>(out: &mut [T]) {
    out.fill(T::EQUILIBRIUM);
}

/// Local buffer owned by the callback, refilled in bursts from the shared queue.
struct MappingState {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to the available channels
///
/// `st.pos` advances once per destination frame (after the last channel).
fn next_sample_mapped(st: &mut MappingState, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }

    let frame_start = st.pos;
    let get_src = |ch: usize, st: &MappingState| -> f32 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0.0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (1, 1) | (1, 2) => get_src(0, st),
        (2, 2) => get_src(dst_ch.min(1), st),
        (2, 1) => 0.5 * (get_src(0, st) + get_src(1, st)),
        _ => get_src(dst_ch.min(st.src_channels.saturating_sub(1)), st),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}
