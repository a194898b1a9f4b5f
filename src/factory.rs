use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::audio::{
    AudioOutput, CaptureConfig, CaptureDevice, CaptureDeviceFactory, CaptureSource, ClockedOutput,
};
use crate::config::{expand_path, Config, LiveProvider};
use crate::live::{GeminiLiveConnector, LiveConnector};
use crate::nats::NatsRelayConnector;
use crate::session::{JobRole, LiveSession, SessionConfig};

/// Builds sessions wired to the configured devices and remote endpoint
pub struct SessionFactory {
    config: Config,
    connector: Arc<dyn LiveConnector>,
}

impl SessionFactory {
    pub fn from_config(config: Config) -> Result<Self> {
        let connector = build_connector(&config)?;
        Ok(Self { config, connector })
    }

    /// Use a specific connector instead of the configured one
    pub fn with_connector(config: Config, connector: Arc<dyn LiveConnector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session_config(&self, role: JobRole, voice: Option<String>) -> SessionConfig {
        let live = &self.config.live;
        let audio = &self.config.audio;
        SessionConfig {
            role,
            model: live.model.clone(),
            voice: voice.unwrap_or_else(|| live.voice.clone()),
            capture_sample_rate: audio.capture_sample_rate,
            output_sample_rate: audio.output_sample_rate,
            preconnect_buffer: audio.preconnect_buffer,
            ..SessionConfig::default()
        }
    }

    /// A new idle session for `config`
    pub fn create(&self, config: SessionConfig) -> Result<LiveSession> {
        let capture = self.capture_device()?;
        let output = self.output_device()?;
        Ok(LiveSession::new(
            config,
            capture,
            output,
            Arc::clone(&self.connector),
        ))
    }

    fn capture_device(&self) -> Result<Box<dyn CaptureDevice>> {
        let audio = &self.config.audio;
        let source = if audio.input.eq_ignore_ascii_case("microphone") {
            CaptureSource::Microphone
        } else {
            CaptureSource::File(PathBuf::from(expand_path(&audio.input)?))
        };

        let capture_config = CaptureConfig {
            sample_rate: audio.capture_sample_rate,
            block_size: audio.block_size,
            ..CaptureConfig::default()
        };

        CaptureDeviceFactory::create(source, capture_config).context("Failed to create capture device")
    }

    fn output_device(&self) -> Result<Box<dyn AudioOutput>> {
        let audio = &self.config.audio;
        match audio.output.to_ascii_lowercase().as_str() {
            "clocked" | "headless" => {
                let mut output = ClockedOutput::new(audio.output_sample_rate);
                if let Some(path) = &audio.render_path {
                    output = output.with_render_path(expand_path(path)?);
                }
                Ok(Box::new(output))
            }
            "speaker" => {
                #[cfg(feature = "device-io")]
                {
                    Ok(Box::new(crate::audio::SpeakerOutput::new(audio.output_sample_rate)))
                }

                #[cfg(not(feature = "device-io"))]
                {
                    bail!("speaker output requires the `device-io` feature (or set audio.output = \"clocked\")")
                }
            }
            other => bail!("Unknown audio output: {}", other),
        }
    }
}

fn build_connector(config: &Config) -> Result<Arc<dyn LiveConnector>> {
    let live = &config.live;
    let handshake_timeout = Duration::from_secs(live.handshake_timeout_secs);

    match live.provider {
        LiveProvider::Gemini => {
            let api_key = std::env::var(&live.api_key_env).with_context(|| {
                format!("Gemini API key not set (expected in ${})", live.api_key_env)
            })?;
            info!("Live provider: Gemini ({})", live.model);
            Ok(Arc::new(
                GeminiLiveConnector::new(&live.endpoint, api_key)
                    .with_handshake_timeout(handshake_timeout),
            ))
        }
        LiveProvider::Nats => {
            info!("Live provider: NATS relay ({})", live.nats_url);
            Ok(Arc::new(
                NatsRelayConnector::new(&live.nats_url).with_handshake_timeout(handshake_timeout),
            ))
        }
    }
}
