use anyhow::Result;
use serde::Deserialize;

use crate::audio::{CAPTURE_BLOCK_SIZE, CAPTURE_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::live::{DEFAULT_MODEL, DEFAULT_VOICE, GEMINI_LIVE_ENDPOINT};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub live: LiveServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// "microphone" or a path to a prerecorded audio file
    pub input: String,
    /// Output device: "speaker" or "clocked" (headless)
    pub output: String,
    /// Write the played timeline to this WAV file (clocked output only)
    pub render_path: Option<String>,
    pub capture_sample_rate: u32,
    pub output_sample_rate: u32,
    pub block_size: usize,
    pub preconnect_buffer: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input: "microphone".to_string(),
            output: "speaker".to_string(),
            render_path: None,
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            block_size: CAPTURE_BLOCK_SIZE,
            preconnect_buffer: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveProvider {
    Gemini,
    Nats,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveServiceConfig {
    pub provider: LiveProvider,
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    /// Environment variable holding the API key (never stored in the file)
    pub api_key_env: String,
    pub nats_url: String,
    pub handshake_timeout_secs: u64,
}

impl Default for LiveServiceConfig {
    fn default() -> Self {
        Self {
            provider: LiveProvider::Gemini,
            endpoint: GEMINI_LIVE_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            handshake_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load from a config file (any format the `config` crate knows,
    /// extension optional) with `COACH__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("COACH").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &str) -> Result<String> {
    Ok(shellexpand::full(path)?.into_owned())
}
