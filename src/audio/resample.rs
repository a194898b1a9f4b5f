//! Sample-rate conversion for capture and playback
//!
//! FFT resampling through rubato, mono only. `MonoResampler` streams a
//! single channel; `BlockResampler` sits in front of it on the capture side,
//! downmixing device or file audio and cutting the resampled stream into
//! fixed-size blocks at the capture rate.

use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::{Fft, FixedSync, Resampler};

use super::backend::{AudioFrame, CaptureConfig};
use crate::error::{SessionError, SessionResult};

/// Input frames handed to the FFT per pass
const CHUNK_SIZE: usize = 1024;

/// Number of sub-chunks for the FFT resampler (1 = lowest latency)
const RESAMPLER_SUB_CHUNKS: usize = 1;

const MONO: usize = 1;

fn resample_error(e: impl std::fmt::Display) -> SessionError {
    SessionError::Device(format!("resampler: {}", e))
}

/// Normalized f32 to i16 PCM
pub fn to_pcm16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

/// i16 PCM to normalized f32
pub fn from_pcm16(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

struct FftStage {
    resampler: Fft<f32>,
    input_buffer: Vec<f32>,
    work_in: Vec<Vec<f32>>,
    work_out: Vec<Vec<f32>>,
    /// Leading output frames still to discard (filter delay)
    delay: usize,
}

impl FftStage {
    fn new(from: u32, to: u32) -> SessionResult<Self> {
        let resampler = Fft::<f32>::new(
            from as usize,
            to as usize,
            CHUNK_SIZE,
            RESAMPLER_SUB_CHUNKS,
            MONO,
            FixedSync::Input,
        )
        .map_err(resample_error)?;

        let work_in = vec![vec![0.0; resampler.input_frames_max()]];
        let work_out = vec![vec![0.0; resampler.output_frames_max()]];
        let delay = resampler.output_delay();

        Ok(Self {
            resampler,
            input_buffer: Vec::new(),
            work_in,
            work_out,
            delay,
        })
    }

    fn process(&mut self, samples: &[f32]) -> SessionResult<Vec<f32>> {
        self.input_buffer.extend_from_slice(samples);
        let mut output = Vec::new();

        while self.input_buffer.len() >= self.resampler.input_frames_next() {
            let frames_needed = self.resampler.input_frames_next();
            self.work_in[0][..frames_needed].copy_from_slice(&self.input_buffer[..frames_needed]);
            self.input_buffer.drain(..frames_needed);

            let input_adapter = SequentialSliceOfVecs::new(&self.work_in[..], MONO, frames_needed)
                .map_err(resample_error)?;
            let output_frames = self.resampler.output_frames_next();
            let mut output_adapter =
                SequentialSliceOfVecs::new_mut(&mut self.work_out[..], MONO, output_frames)
                    .map_err(resample_error)?;

            let (_, frames_written) = self
                .resampler
                .process_into_buffer(&input_adapter, &mut output_adapter, None)
                .map_err(resample_error)?;

            let fresh = &self.work_out[0][..frames_written];
            let skip = self.delay.min(fresh.len());
            self.delay -= skip;
            output.extend_from_slice(&fresh[skip..]);
        }

        Ok(output)
    }
}

/// Streaming mono resampler
///
/// The filter delay is trimmed, so output frame `k` lines up with input
/// time `k / to`. After `finish` the stream has produced exactly
/// `round(n * to / from)` frames for `n` input frames.
pub struct MonoResampler {
    from: u32,
    to: u32,
    stage: Option<FftStage>,
    frames_in: u64,
    frames_out: u64,
}

impl MonoResampler {
    pub fn new(from: u32, to: u32) -> SessionResult<Self> {
        if from == 0 || to == 0 {
            return Err(SessionError::Device(format!(
                "cannot resample {}Hz to {}Hz",
                from, to
            )));
        }

        let stage = if from == to {
            None
        } else {
            Some(FftStage::new(from, to)?)
        };

        Ok(Self {
            from,
            to,
            stage,
            frames_in: 0,
            frames_out: 0,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.from
    }

    pub fn output_rate(&self) -> u32 {
        self.to
    }

    /// Feed samples, get whatever output is ready (may be empty)
    pub fn process(&mut self, samples: &[f32]) -> SessionResult<Vec<f32>> {
        self.frames_in += samples.len() as u64;
        let output = match self.stage.as_mut() {
            Some(stage) => stage.process(samples)?,
            None => samples.to_vec(),
        };
        self.frames_out += output.len() as u64;
        Ok(output)
    }

    /// Push silence through the filter and return the remaining output
    pub fn finish(&mut self) -> SessionResult<Vec<f32>> {
        let (from, to) = (self.from as u64, self.to as u64);
        let expected = (self.frames_in * to + from / 2) / from;
        let remaining = expected.saturating_sub(self.frames_out) as usize;

        let Some(stage) = self.stage.as_mut() else {
            return Ok(Vec::new());
        };

        let silence = vec![0.0; CHUNK_SIZE];
        let mut output = Vec::with_capacity(remaining);
        while output.len() < remaining {
            output.extend(stage.process(&silence)?);
        }
        output.truncate(remaining);
        stage.input_buffer.clear();

        self.frames_out += output.len() as u64;
        Ok(output)
    }
}

/// Resample a whole mono buffer in one go
pub fn resample_mono(samples: &[f32], from: u32, to: u32) -> SessionResult<Vec<f32>> {
    let mut resampler = MonoResampler::new(from, to)?;
    let mut output = resampler.process(samples)?;
    output.extend(resampler.finish()?);
    Ok(output)
}

/// Turns interleaved capture audio at any rate into mono blocks of
/// exactly `block_size` samples at the capture rate
pub struct BlockResampler {
    channels: usize,
    block_size: usize,
    resampler: MonoResampler,
    pending: Vec<f32>,
    blocks_emitted: u64,
}

impl BlockResampler {
    pub fn new(
        source_rate: u32,
        source_channels: u16,
        config: &CaptureConfig,
    ) -> SessionResult<Self> {
        Ok(Self {
            channels: source_channels.max(1) as usize,
            block_size: config.block_size.max(1),
            resampler: MonoResampler::new(source_rate, config.sample_rate)?,
            pending: Vec::new(),
            blocks_emitted: 0,
        })
    }

    /// Feed interleaved normalized samples, get every completed block
    pub fn push(&mut self, interleaved: &[f32]) -> SessionResult<Vec<AudioFrame>> {
        let mono: Vec<f32> = if self.channels == 1 {
            interleaved.to_vec()
        } else {
            interleaved
                .chunks_exact(self.channels)
                .map(|group| group.iter().sum::<f32>() / self.channels as f32)
                .collect()
        };

        let resampled = self.resampler.process(&mono)?;
        self.pending.extend(resampled);
        Ok(self.take_blocks())
    }

    pub fn push_pcm16(&mut self, interleaved: &[i16]) -> SessionResult<Vec<AudioFrame>> {
        let samples: Vec<f32> = interleaved.iter().copied().map(from_pcm16).collect();
        self.push(&samples)
    }

    /// Flush the resampler. The last block may be short.
    pub fn finish(&mut self) -> SessionResult<Vec<AudioFrame>> {
        let tail = self.resampler.finish()?;
        self.pending.extend(tail);

        let mut blocks = self.take_blocks();
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            blocks.push(self.block(&rest));
        }
        Ok(blocks)
    }

    fn take_blocks(&mut self) -> Vec<AudioFrame> {
        let full = self.pending.len() / self.block_size;
        if full == 0 {
            return Vec::new();
        }

        let ready: Vec<f32> = self.pending.drain(..full * self.block_size).collect();
        ready
            .chunks_exact(self.block_size)
            .map(|chunk| self.block(chunk))
            .collect()
    }

    fn block(&mut self, samples: &[f32]) -> AudioFrame {
        let rate = self.resampler.output_rate();
        let timestamp_ms = self.blocks_emitted * self.block_size as u64 * 1000 / rate as u64;
        self.blocks_emitted += 1;

        AudioFrame {
            samples: samples.iter().copied().map(to_pcm16).collect(),
            sample_rate: rate,
            channels: 1,
            timestamp_ms,
        }
    }
}
