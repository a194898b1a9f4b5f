use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::SessionResult;

/// Samples per capture block delivered to the session (mono)
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Capture sample rate expected by the live endpoint
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio streamed back by the live endpoint
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Frame duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Configuration for a capture device
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate (devices resample if needed)
    pub sample_rate: u32,
    /// Target channel count (1 = mono)
    pub channels: u16,
    /// Samples per delivered block
    pub block_size: usize,
    /// Capacity of the frame channel handed to the session
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            block_size: CAPTURE_BLOCK_SIZE,
            channel_capacity: 64,
        }
    }
}

/// Audio capture device
///
/// Implementations:
/// - File: decode a prerecorded answer and deliver it at capture cadence
/// - Microphone: system default input through cpal (`device-io` feature)
///
/// Capture callbacks must never block: frames are handed over with
/// `try_send` and dropped when the session falls behind.
#[async_trait::async_trait]
pub trait CaptureDevice: Send {
    /// Request access to the device and start capturing
    ///
    /// Returns a channel receiver that will receive fixed-size audio blocks,
    /// or `SessionError::Device` if access is denied or no device exists.
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing and release the device. Safe to call repeatedly.
    fn stop(&mut self);

    /// Check if the device is currently capturing
    fn is_capturing(&self) -> bool;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Capture source selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Default system microphone
    Microphone,
    /// Prerecorded audio file, paced in real time
    File(PathBuf),
}

/// Capture device factory
pub struct CaptureDeviceFactory;

impl CaptureDeviceFactory {
    /// Create a capture device for the given source
    pub fn create(
        source: CaptureSource,
        config: CaptureConfig,
    ) -> SessionResult<Box<dyn CaptureDevice>> {
        match source {
            CaptureSource::File(path) => Ok(Box::new(super::file::FileCapture::new(path, config))),

            CaptureSource::Microphone => {
                #[cfg(feature = "device-io")]
                {
                    Ok(Box::new(super::device::MicrophoneCapture::new(config)))
                }

                #[cfg(not(feature = "device-io"))]
                {
                    let _ = config;
                    Err(crate::error::SessionError::Device(
                        "microphone capture requires the `device-io` feature".to_string(),
                    ))
                }
            }
        }
    }
}
