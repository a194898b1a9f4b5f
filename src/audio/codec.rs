//! Transport encoding for live audio
//!
//! Outbound: i16 PCM little-endian bytes, base64 (standard alphabet),
//! tagged `audio/pcm;rate=<hz>`. Inbound chunks use the same encoding and
//! are decoded to normalized f32 samples for playback.

use std::sync::Arc;

use base64::Engine;

use super::backend::AudioFrame;
use super::resample::{from_pcm16, resample_mono, to_pcm16};
use crate::error::{SessionError, SessionResult};

/// An immutable unit of outbound audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Base64 PCM bytes
    pub data: String,
    /// MIME type, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

/// Decoded inbound audio, ready to schedule
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    /// Interleaved samples normalized to -1.0..1.0
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PlaybackBuffer {
    /// Frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// MIME type for raw PCM at a given rate
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Sample rate declared by a `audio/pcm;rate=N` MIME type, if any
pub fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

/// Encode a captured frame for the wire
pub fn encode_frame(frame: &AudioFrame) -> EncodedChunk {
    let pcm_bytes: Vec<u8> = frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect();

    EncodedChunk {
        data: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
        mime_type: pcm_mime_type(frame.sample_rate),
    }
}

/// Decode an inbound chunk into a mono playback buffer
///
/// The sample rate comes from the MIME type when it declares one.
pub fn decode_chunk(
    data: &str,
    mime_type: Option<&str>,
    default_rate: u32,
) -> SessionResult<PlaybackBuffer> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| SessionError::Decode(format!("invalid base64: {}", e)))?;

    if bytes.is_empty() {
        return Err(SessionError::Decode("empty audio payload".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(SessionError::Decode(format!(
            "odd PCM16 byte count: {}",
            bytes.len()
        )));
    }

    let sample_rate = mime_type.and_then(rate_from_mime).unwrap_or(default_rate);
    if sample_rate == 0 {
        return Err(SessionError::Decode("zero sample rate".to_string()));
    }

    let samples: Arc<[f32]> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(PlaybackBuffer {
        samples,
        sample_rate,
        channels: 1,
    })
}

/// Convert a frame to mono at `target_rate`
///
/// Stereo is averaged. Any rate mismatch goes through the FFT resampler,
/// so the result always carries `target_rate` and
/// `round(frames * target_rate / source_rate)` samples.
pub fn normalize_frame(frame: AudioFrame, target_rate: u32) -> SessionResult<AudioFrame> {
    let mono = downmix(frame);

    if mono.sample_rate == target_rate || mono.samples.is_empty() {
        return Ok(mono);
    }

    let samples: Vec<f32> = mono.samples.iter().copied().map(from_pcm16).collect();
    let resampled = resample_mono(&samples, mono.sample_rate, target_rate)?;

    Ok(AudioFrame {
        samples: resampled.into_iter().map(to_pcm16).collect(),
        sample_rate: target_rate,
        channels: 1,
        timestamp_ms: mono.timestamp_ms,
    })
}

fn downmix(frame: AudioFrame) -> AudioFrame {
    if frame.channels <= 1 {
        return frame;
    }

    let channels = frame.channels as usize;
    let samples = frame
        .samples
        .chunks_exact(channels)
        .map(|group| {
            let sum: i32 = group.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect();

    AudioFrame {
        samples,
        sample_rate: frame.sample_rate,
        channels: 1,
        timestamp_ms: frame.timestamp_ms,
    }
}
