use serde::{Deserialize, Serialize};

use crate::live::{LiveConfig, RemoteEvent};

/// Session setup request sent to the relay (request/reply)
#[derive(Debug, Serialize, Deserialize)]
pub struct RelaySetup {
    pub session_id: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub response_modalities: Vec<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

impl From<&LiveConfig> for RelaySetup {
    fn from(config: &LiveConfig) -> Self {
        Self {
            session_id: config.session_id.clone(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            system_instruction: config.system_instruction.clone(),
            response_modalities: vec![config.response_modality.as_str().to_string()],
            input_sample_rate: config.input_sample_rate,
            output_sample_rate: config.output_sample_rate,
        }
    }
}

/// Relay's answer to `RelaySetup`
#[derive(Debug, Serialize, Deserialize)]
pub struct RelaySetupReply {
    pub accepted: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Captured audio published to the relay
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u32,
    pub pcm: String, // Base64-encoded PCM16 LE bytes
    pub mime_type: String,
    pub timestamp: String, // RFC3339 timestamp
    #[serde(rename = "final")]
    pub final_frame: bool,
}

/// Event published by the relay for one session
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    Audio {
        pcm: String,
        #[serde(default)]
        mime_type: Option<String>,
    },
    Interrupted,
    Transcript {
        text: String,
    },
    TurnComplete,
    Closed {
        #[serde(default)]
        reason: Option<String>,
    },
    Error {
        message: String,
    },
}

impl From<RelayEvent> for RemoteEvent {
    fn from(event: RelayEvent) -> Self {
        match event {
            RelayEvent::Audio { pcm, mime_type } => RemoteEvent::Audio {
                data: pcm,
                mime_type,
            },
            RelayEvent::Interrupted => RemoteEvent::Interrupted,
            RelayEvent::Transcript { text } => RemoteEvent::Text(text),
            RelayEvent::TurnComplete => RemoteEvent::TurnComplete,
            RelayEvent::Closed { reason } => RemoteEvent::Closed { reason },
            RelayEvent::Error { message } => RemoteEvent::Error(message),
        }
    }
}

/// Subjects used by one relayed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySubjects {
    pub setup: String,
    pub audio_in: String,
    pub events: String,
    pub close: String,
}

impl RelaySubjects {
    pub fn for_session(session_id: &str) -> Self {
        Self {
            setup: format!("live.{}.setup", session_id),
            audio_in: format!("live.{}.audio.in", session_id),
            events: format!("live.{}.events", session_id),
            close: format!("live.{}.close", session_id),
        }
    }
}
