// System audio devices through cpal
//
// cpal streams are not Send, so each stream lives on its own thread and is
// dropped there when the shutdown channel fires. Callbacks never block:
// captured blocks go out with `try_send`, the speaker pulls from the shared
// mixer.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{AudioFrame, CaptureConfig, CaptureDevice};
use super::codec::PlaybackBuffer;
use super::output::{lock_mixer, AudioOutput, Mixer};
use super::playback::BufferId;
use super::resample::BlockResampler;
use crate::error::{SessionError, SessionResult};

struct StreamThread {
    shutdown: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    fn stop(self) {
        let _ = self.shutdown.send(());
        if self.handle.join().is_err() {
            error!("Audio stream thread panicked");
        }
    }
}

/// Pick the preferred rate and channel count if the device supports them
/// (f32 first, then any sample format), else the device default
fn pick_config(
    device: &cpal::Device,
    input: bool,
    sample_rate: u32,
    channels: u16,
) -> SessionResult<(StreamConfig, SampleFormat)> {
    let preferred = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let supported = if input {
        device.supported_input_configs().map(|c| c.collect::<Vec<_>>())
    } else {
        device.supported_output_configs().map(|c| c.collect::<Vec<_>>())
    }
    .map_err(|e| SessionError::Device(format!("failed to query device configs: {}", e)))?;

    if let Some(format) = preferred_format(&supported, sample_rate, channels) {
        return Ok((preferred, format));
    }

    let default = if input {
        device.default_input_config()
    } else {
        device.default_output_config()
    }
    .map_err(|e| SessionError::Device(format!("no usable device config: {}", e)))?;

    Ok((default.config(), default.sample_format()))
}

/// Sample format to open `sample_rate`/`channels` with: f32 when a range
/// offers it, else whatever format the first covering range has
fn preferred_format(
    supported: &[cpal::SupportedStreamConfigRange],
    sample_rate: u32,
    channels: u16,
) -> Option<SampleFormat> {
    let rate = SampleRate(sample_rate);
    let mut covering = supported.iter().filter(|c| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    });

    let first = covering.next()?.sample_format();
    if first == SampleFormat::F32 {
        return Some(first);
    }
    Some(
        covering
            .map(|c| c.sample_format())
            .find(|f| *f == SampleFormat::F32)
            .unwrap_or(first),
    )
}

/// Microphone stream for one sample type: samples go through the block
/// resampler and full blocks are handed over with `try_send`
fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut blocks: BlockResampler,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample,
    f32: FromSample<T>,
{
    let mut converted: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            converted.clear();
            converted.extend(data.iter().map(|&sample| f32::from_sample(sample)));

            match blocks.push(&converted) {
                Ok(ready) => {
                    for frame in ready {
                        if frame_tx.try_send(frame).is_err() {
                            warn!("Capture block dropped (session busy)");
                        }
                    }
                }
                Err(e) => error!("Capture resampling failed: {}", e),
            }
        },
        |err| error!("Microphone stream error: {}", err),
        None,
    )
}

/// Speaker stream for one sample type, pulling mono frames from the mixer
fn build_speaker_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    completions: mpsc::UnboundedSender<BufferId>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            mono.resize(data.len() / channels, 0.0);
            let finished = lock_mixer(&mixer).render(&mut mono);
            for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                frame.fill(T::from_sample(sample));
            }
            for id in finished {
                let _ = completions.send(id);
            }
        },
        |err| error!("Speaker stream error: {}", err),
        None,
    )
}

fn unsupported_format(format: SampleFormat) -> SessionError {
    SessionError::Device(format!("unsupported sample format: {}", format))
}

/// Default system microphone
pub struct MicrophoneCapture {
    config: CaptureConfig,
    stream: Option<StreamThread>,
}

impl MicrophoneCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureDevice for MicrophoneCapture {
    async fn start(&mut self) -> SessionResult<mpsc::Receiver<AudioFrame>> {
        if self.stream.is_some() {
            return Err(SessionError::Device("microphone already capturing".to_string()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(self.config.channel_capacity);
        let (ready_tx, ready_rx) = oneshot::channel::<SessionResult<String>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let capture = self.config.clone();

        let handle = std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_input_device() {
                Some(device) => device,
                None => {
                    let _ = ready_tx.send(Err(SessionError::Device(
                        "no input device available".to_string(),
                    )));
                    return;
                }
            };
            let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

            let (stream_config, sample_format) =
                match pick_config(&device, true, capture.sample_rate, capture.channels) {
                    Ok(picked) => picked,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

            let source_rate = stream_config.sample_rate.0;
            let source_channels = stream_config.channels;
            let blocks = match BlockResampler::new(source_rate, source_channels, &capture) {
                Ok(blocks) => blocks,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let stream = match sample_format {
                SampleFormat::F32 => {
                    build_capture_stream::<f32>(&device, &stream_config, blocks, frame_tx)
                }
                SampleFormat::I16 => {
                    build_capture_stream::<i16>(&device, &stream_config, blocks, frame_tx)
                }
                SampleFormat::U16 => {
                    build_capture_stream::<u16>(&device, &stream_config, blocks, frame_tx)
                }
                other => {
                    let _ = ready_tx.send(Err(unsupported_format(other)));
                    return;
                }
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(SessionError::Device(format!(
                        "failed to open microphone: {}",
                        e
                    ))));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(SessionError::Device(format!(
                    "failed to start microphone: {}",
                    e
                ))));
                return;
            }

            info!(
                "Microphone capturing: {} ({}Hz, {} channels, {})",
                device_name, source_rate, source_channels, sample_format
            );
            let _ = ready_tx.send(Ok(device_name));

            // Hold the stream until stop() or the capture owner goes away
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        match ready_rx.await {
            Ok(Ok(_)) => {
                self.stream = Some(StreamThread {
                    shutdown: shutdown_tx,
                    handle,
                });
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(SessionError::Device(
                "microphone thread exited before starting".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            info!("Microphone released");
        }
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

/// Default system speaker fed from a `Mixer`
pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<StreamThread>,
}

impl SpeakerOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new(sample_rate))),
            stream: None,
        }
    }
}

impl AudioOutput for SpeakerOutput {
    fn open(&mut self, completions: mpsc::UnboundedSender<BufferId>) -> SessionResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let requested_rate = lock_mixer(&self.mixer).sample_rate();
        let (ready_tx, ready_rx) = std_mpsc::channel::<SessionResult<u32>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let mixer = Arc::clone(&self.mixer);

        let handle = std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_output_device() {
                Some(device) => device,
                None => {
                    let _ = ready_tx.send(Err(SessionError::Device(
                        "no output device available".to_string(),
                    )));
                    return;
                }
            };

            let (stream_config, sample_format) =
                match pick_config(&device, false, requested_rate, 1) {
                    Ok(picked) => picked,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
            let device_rate = stream_config.sample_rate.0;

            // Nothing is scheduled yet, so the timeline can adopt the device rate
            if device_rate != requested_rate {
                *lock_mixer(&mixer) = Mixer::new(device_rate);
            }

            let stream = match sample_format {
                SampleFormat::F32 => {
                    build_speaker_stream::<f32>(&device, &stream_config, mixer, completions)
                }
                SampleFormat::I16 => {
                    build_speaker_stream::<i16>(&device, &stream_config, mixer, completions)
                }
                SampleFormat::U16 => {
                    build_speaker_stream::<u16>(&device, &stream_config, mixer, completions)
                }
                other => {
                    let _ = ready_tx.send(Err(unsupported_format(other)));
                    return;
                }
            };

            let stream = match stream.map_err(|e| e.to_string()).and_then(|s| {
                s.play().map_err(|e| e.to_string())?;
                Ok(s)
            }) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(SessionError::Device(format!(
                        "failed to open speaker: {}",
                        e
                    ))));
                    return;
                }
            };

            let _ = ready_tx.send(Ok(device_rate));
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(rate)) => {
                info!("Speaker output opened ({}Hz)", rate);
                self.stream = Some(StreamThread {
                    shutdown: shutdown_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(SessionError::Device(
                "speaker thread exited before starting".to_string(),
            )),
        }
    }

    fn current_time(&self) -> f64 {
        lock_mixer(&self.mixer).now()
    }

    fn schedule(
        &mut self,
        id: BufferId,
        buffer: &PlaybackBuffer,
        start_at: f64,
    ) -> SessionResult<()> {
        if self.stream.is_none() {
            return Err(SessionError::Device("speaker is not open".to_string()));
        }
        lock_mixer(&self.mixer).schedule(id, buffer, start_at)
    }

    fn stop_buffer(&mut self, id: BufferId) {
        lock_mixer(&self.mixer).stop(id);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            info!("Speaker output closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        "speaker"
    }
}
