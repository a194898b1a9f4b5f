use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, CaptureConfig, CaptureDevice};
use super::resample::BlockResampler;
use crate::error::{SessionError, SessionResult};

/// A fully decoded audio file (i16 PCM, interleaved)
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    /// Decode any container/codec pair symphonia supports
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Unsupported audio format")?;
        let mut format = probed.format;

        let (track_id, params) = {
            let track = format
                .tracks()
                .iter()
                .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
                .context("No decodable audio track")?;
            (track.id, track.codec_params.clone())
        };

        let sample_rate = params.sample_rate.context("Audio track has no sample rate")?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .context("Failed to create audio decoder")?;

        let mut samples: Vec<i16> = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(e).context("Failed to decode audio packet"),
            }
        }

        let duration_seconds = samples.len() as f64 / (sample_rate as f64 * channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            sample_rate,
            channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate,
            channels,
            samples,
        })
    }

    /// Resample to the configured rate (mono) and split into capture
    /// blocks of `block_size` samples; only the last block may be short
    pub fn into_blocks(self, config: &CaptureConfig) -> SessionResult<Vec<AudioFrame>> {
        let mut resampler = BlockResampler::new(self.sample_rate, self.channels, config)?;
        let mut blocks = resampler.push_pcm16(&self.samples)?;
        blocks.extend(resampler.finish()?);

        debug!(
            "{}: {} blocks at {}Hz from {}Hz",
            self.path,
            blocks.len(),
            config.sample_rate,
            self.sample_rate
        );
        Ok(blocks)
    }
}

/// Capture device replaying a prerecorded answer
///
/// Blocks are delivered at real-time cadence unless pacing is disabled.
pub struct FileCapture {
    path: PathBuf,
    config: CaptureConfig,
    paced: bool,
    task: Option<JoinHandle<()>>,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>, config: CaptureConfig) -> Self {
        Self {
            path: path.into(),
            config,
            paced: true,
            task: None,
        }
    }

    /// Deliver blocks as fast as the channel accepts them
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

#[async_trait::async_trait]
impl CaptureDevice for FileCapture {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            return Err(SessionError::Device("file capture already running".to_string()));
        }

        let audio = AudioFile::open(&self.path)
            .map_err(|e| SessionError::Device(format!("{:#}", e)))?;
        let blocks = audio.into_blocks(&self.config)?;
        let block_duration =
            Duration::from_secs_f64(self.config.block_size as f64 / self.config.sample_rate as f64);
        let paced = self.paced;

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        info!(
            "File capture started: {} ({} blocks, paced={})",
            self.path.display(),
            blocks.len(),
            paced
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(block_duration);
            let mut dropped = 0usize;

            for frame in blocks {
                if paced {
                    ticker.tick().await;
                    match tx.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => dropped += 1,
                        Err(TrySendError::Closed(_)) => break,
                    }
                } else if tx.send(frame).await.is_err() {
                    break;
                }
            }

            if dropped > 0 {
                warn!("File capture dropped {} blocks (session fell behind)", dropped);
            }
            debug!("File capture exhausted");
        });

        self.task = Some(task);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped: {}", self.path.display());
        }
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "file"
    }
}
