use thiserror::Error;

/// Errors surfaced by a live interview session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Microphone unavailable or access denied. The session never starts.
    #[error("audio device error: {0}")]
    Device(String),

    /// Handshake or mid-session transport failure. The session is torn down.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed inbound audio chunk. The chunk is dropped, playback continues.
    #[error("failed to decode audio chunk: {0}")]
    Decode(String),

    /// Operation not valid in the session's current lifecycle state
    #[error("invalid session state: {0}")]
    InvalidState(String),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
