// Output side of the live session: a software timeline of scheduled
// buffers and the devices that advance it.
//
// The session only sees the `AudioOutput` trait: an output clock, buffer
// scheduling/stopping and completion notifications. The `Mixer` does the
// sample work; `ClockedOutput` advances it from a tokio interval (headless,
// optionally rendering to WAV) and the cpal `SpeakerOutput` advances it
// from the device callback.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::codec::PlaybackBuffer;
use super::playback::BufferId;
use super::render::WavRenderer;
use super::resample::resample_mono;
use crate::error::{SessionError, SessionResult};

/// Output device context
pub trait AudioOutput: Send {
    /// Acquire the device. Finished buffers are reported on `completions`.
    fn open(&mut self, completions: mpsc::UnboundedSender<BufferId>) -> SessionResult<()>;

    /// Current output clock time in seconds (0.0 before `open`)
    fn current_time(&self) -> f64;

    /// Schedule a buffer to start at `start_at` on the output clock
    fn schedule(&mut self, id: BufferId, buffer: &PlaybackBuffer, start_at: f64)
        -> SessionResult<()>;

    /// Stop a scheduled buffer. No completion is reported for it.
    fn stop_buffer(&mut self, id: BufferId);

    /// Release the device
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn name(&self) -> &str;
}

struct Voice {
    id: BufferId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Software mixer over a frame-indexed timeline (mono)
pub struct Mixer {
    sample_rate: u32,
    position: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            voices: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Timeline position in seconds
    pub fn now(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn schedule(
        &mut self,
        id: BufferId,
        buffer: &PlaybackBuffer,
        start_at: f64,
    ) -> SessionResult<()> {
        let samples = conform(buffer, self.sample_rate)?;
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;

        self.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
        Ok(())
    }

    /// Drop a voice without reporting completion
    pub fn stop(&mut self, id: BufferId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    /// Mix the next `out.len()` frames and advance the clock.
    /// Returns the voices that finished within the rendered span.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<BufferId> {
        out.fill(0.0);
        let span_start = self.position;
        let span_end = span_start + out.len() as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(span_start);
            let to = voice.end_frame().min(span_end);
            for frame in from..to {
                let sample = voice.samples[(frame - voice.start_frame) as usize];
                out[(frame - span_start) as usize] += sample;
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.position = span_end;

        let mut finished = Vec::new();
        self.voices.retain(|voice| {
            if voice.end_frame() <= span_end {
                finished.push(voice.id);
                false
            } else {
                true
            }
        });
        finished
    }

    /// Advance the clock without keeping the mixed samples
    pub fn advance(&mut self, frames: usize) -> Vec<BufferId> {
        let mut scratch = vec![0.0; frames];
        self.render(&mut scratch)
    }
}

/// Downmix to mono and resample to the mixer rate
fn conform(buffer: &PlaybackBuffer, rate: u32) -> SessionResult<Arc<[f32]>> {
    let channels = buffer.channels.max(1) as usize;
    let mono: Vec<f32> = if channels == 1 {
        buffer.samples.to_vec()
    } else {
        buffer
            .samples
            .chunks_exact(channels)
            .map(|group| group.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    if buffer.sample_rate == rate || mono.is_empty() {
        return Ok(mono.into());
    }

    Ok(resample_mono(&mono, buffer.sample_rate, rate)?.into())
}

pub(crate) fn lock_mixer(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Real-time output without a sound card
///
/// A tokio interval advances the mixer by wall-clock time. When a render
/// path is set the played timeline is written to a WAV file.
pub struct ClockedOutput {
    mixer: Arc<Mutex<Mixer>>,
    tick: Duration,
    render_path: Option<PathBuf>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ClockedOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new(sample_rate))),
            tick: Duration::from_millis(20),
            render_path: None,
            shutdown: None,
            task: None,
        }
    }

    /// Also write everything played to `path`
    pub fn with_render_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.render_path = Some(path.into());
        self
    }
}

impl AudioOutput for ClockedOutput {
    fn open(&mut self, completions: mpsc::UnboundedSender<BufferId>) -> SessionResult<()> {
        if self.task.is_some() {
            return Ok(());
        }

        let sample_rate = lock_mixer(&self.mixer).sample_rate();
        let mut renderer = match &self.render_path {
            Some(path) => Some(
                WavRenderer::create(path, sample_rate)
                    .map_err(|e| SessionError::Device(format!("{:#}", e)))?,
            ),
            None => None,
        };

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mixer = Arc::clone(&self.mixer);
        let tick = self.tick;

        let task = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut rendered: u64 = 0;
            let mut ticker = tokio::time::interval(tick);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }

                let target = (started.elapsed().as_secs_f64() * sample_rate as f64) as u64;
                if target <= rendered {
                    continue;
                }
                let mut block = vec![0.0f32; (target - rendered) as usize];
                rendered = target;

                let finished = lock_mixer(&mixer).render(&mut block);
                for id in finished {
                    if completions.send(id).is_err() {
                        debug!("Completion receiver gone");
                    }
                }

                if let Some(writer) = renderer.as_mut() {
                    if let Err(e) = writer.write(&block) {
                        error!("Render failed, disabling WAV output: {:#}", e);
                        renderer = None;
                    }
                }
            }

            if let Some(writer) = renderer {
                if let Err(e) = writer.finish() {
                    error!("Failed to finish rendered WAV: {:#}", e);
                }
            }
        });

        self.shutdown = Some(shutdown_tx);
        self.task = Some(task);
        info!("Clocked output opened ({}Hz)", sample_rate);
        Ok(())
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
        if self.task.is_none() {
            return Err(SessionError::Device("output is not open".to_string()));
        }
        lock_mixer(&self.mixer).schedule(id, buffer, start_at)
    }

    fn stop_buffer(&mut self, id: BufferId) {
        lock_mixer(&self.mixer).stop(id);
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if self.task.take().is_some() {
            info!("Clocked output closed");
        }
    }

    fn is_open(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        "clocked"
    }
}
