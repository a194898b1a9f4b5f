use serde::{Deserialize, Serialize};

use super::prompt::{interviewer_instruction, JobRole};
use crate::audio::{CAPTURE_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::live::{LiveConfig, ResponseModality, DEFAULT_MODEL, DEFAULT_VOICE};

/// Configuration for one live interview session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "interview-<uuid>")
    pub session_id: String,

    /// Role the interviewer screens for
    pub role: JobRole,

    /// Live model name
    pub model: String,

    /// Prebuilt voice of the interviewer
    pub voice: String,

    /// Rate of audio sent to the model (16kHz)
    pub capture_sample_rate: u32,

    /// Rate of model audio when a chunk doesn't declare one (24kHz)
    pub output_sample_rate: u32,

    /// Outbound chunks kept while the connection is still being set up.
    /// Oldest chunks are dropped beyond this bound.
    pub preconnect_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("interview-{}", uuid::Uuid::new_v4()),
            role: JobRole::default(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            preconnect_buffer: 8,
        }
    }
}

impl SessionConfig {
    pub fn for_role(role: impl Into<JobRole>) -> Self {
        Self {
            role: role.into(),
            ..Self::default()
        }
    }

    /// Handshake parameters for the remote session
    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            session_id: self.session_id.clone(),
            model: self.model.clone(),
            response_modality: ResponseModality::Audio,
            voice: self.voice.clone(),
            system_instruction: interviewer_instruction(&self.role),
            input_sample_rate: self.capture_sample_rate,
            output_sample_rate: self.output_sample_rate,
        }
    }
}
