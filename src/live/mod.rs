//! Remote conversational session
//!
//! A `LiveConnector` performs the handshake with the model endpoint and
//! hands back a `LiveConnection`: a bounded outbound queue the session
//! feeds without blocking, and a stream of `RemoteEvent`s. Transport tasks
//! behind the connection own the socket; dropping the outbound sender (or
//! sending `Outbound::Close`) asks them to shut it.
//!
//! Connectors:
//! - `GeminiLiveConnector`: Gemini Live websocket (BidiGenerateContent)
//! - `NatsRelayConnector`: a relay service reached over NATS

mod gemini;
pub mod messages;

pub use gemini::{GeminiLiveConnector, GEMINI_LIVE_ENDPOINT};

use tokio::sync::mpsc;

use crate::audio::EncodedChunk;
use crate::error::SessionResult;

/// Outbound queue depth between the session and the transport task
pub const OUTBOUND_CAPACITY: usize = 32;

/// Inbound event queue depth
pub const EVENT_CAPACITY: usize = 64;

/// Default prebuilt voice for the interviewer
pub const DEFAULT_VOICE: &str = "Kore";

/// Default native-audio live model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// What the remote endpoint responds with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Audio,
    Text,
}

impl ResponseModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseModality::Audio => "AUDIO",
            ResponseModality::Text => "TEXT",
        }
    }
}

/// Handshake parameters for one live session
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub session_id: String,
    pub model: String,
    pub response_modality: ResponseModality,
    /// Prebuilt voice identity
    pub voice: String,
    /// Free-text behavioural instruction (system prompt)
    pub system_instruction: String,
    /// Rate of the PCM we send
    pub input_sample_rate: u32,
    /// Rate we expect back when chunks don't declare one
    pub output_sample_rate: u32,
}

/// Messages from the session to the transport task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Audio(EncodedChunk),
    Close,
}

/// Messages delivered by the remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// Transport-encoded model audio
    Audio {
        data: String,
        mime_type: Option<String>,
    },
    /// The user barged in; cut playback now
    Interrupted,
    /// Transcript text of the model's speech
    Text(String),
    /// The model finished its turn
    TurnComplete,
    /// Remote-initiated normal close
    Closed { reason: Option<String> },
    /// Transport failure
    Error(String),
}

/// An open live session
pub struct LiveConnection {
    pub outbound: mpsc::Sender<Outbound>,
    pub events: mpsc::Receiver<RemoteEvent>,
}

impl LiveConnection {
    pub fn new(outbound: mpsc::Sender<Outbound>, events: mpsc::Receiver<RemoteEvent>) -> Self {
        Self { outbound, events }
    }
}

/// Opens remote conversational sessions
#[async_trait::async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect and complete the handshake, or fail with
    /// `SessionError::Connection`
    async fn connect(&self, config: &LiveConfig) -> SessionResult<LiveConnection>;

    /// Connector name for logging
    fn name(&self) -> &str;
}
