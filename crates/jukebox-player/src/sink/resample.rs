//! Synchronous streaming resampler used by the CPAL sink.
//!
//! Converts decoded interleaved `f32` audio from the source rate to the device rate with
//! Rubato's sinc resampler. Input is accumulated into fixed-size chunks; `flush` pushes the
//! remaining partial chunk through at the end of an item.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub(crate) struct StreamResampler {
    resampler: Async<f32>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    produced: Vec<f32>,
}

impl StreamResampler {
    pub(crate) fn new(
        src_rate: u32,
        dst_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self> {
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);
        let f_ratio = dst_rate as f64 / src_rate.max(1) as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .context("resampler init")?;
        let out_frames = resampler.output_frames_max();

        tracing::debug!(src_rate, dst_rate, channels, chunk_frames, "resampler created");
        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            scratch: vec![0.0; out_frames * channels],
            produced: Vec::new(),
        })
    }

    /// Feed interleaved samples; returns whatever output the completed chunks produced.
    pub(crate) fn process(&mut self, input: &[f32]) -> Result<&[f32]> {
        self.produced.clear();
        self.pending.extend_from_slice(input);

        let chunk_samples = self.chunk_frames * self.channels;
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            self.run_chunk(consumed, self.chunk_frames, None)?;
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(&self.produced)
    }

    /// Push the buffered partial chunk through and reset for the next stream.
    pub(crate) fn flush(&mut self) -> Result<&[f32]> {
        self.produced.clear();
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames > 0 {
            self.run_chunk(0, tail_frames, Some(tail_frames))?;
        }
        self.reset();
        Ok(&self.produced)
    }

    /// Drop buffered input and filter state.
    pub(crate) fn reset(&mut self) {
        self.pending.clear();
        self.resampler.reset();
    }

    fn run_chunk(&mut self, start: usize, frames: usize, partial_len: Option<usize>) -> Result<()> {
        let input = &self.pending[start..start + frames * self.channels];
        let input_adapter = InterleavedSlice::new(input, self.channels, frames)
            .map_err(|e| anyhow::anyhow!("interleaved slice (input): {e}"))?;

        let out_capacity_frames = self.scratch.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.scratch, self.channels, out_capacity_frames)
                .map_err(|e| anyhow::anyhow!("interleaved slice (output): {e}"))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };
        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .context("resampler process")?;

        self.produced
            .extend_from_slice(&self.scratch[..nbr_out * self.channels]);
        Ok(())
    }
}
