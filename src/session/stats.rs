use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Counters for a live session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// When capture was granted
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since start (until teardown once the session ended)
    pub duration_secs: f64,

    /// Capture blocks received from the device
    pub frames_captured: usize,

    /// Encoded chunks handed to the transport
    pub chunks_sent: usize,

    /// Chunks dropped: pre-connect overflow, full transport queue, or terminal state
    pub chunks_dropped: usize,

    /// Audio chunks received from the model
    pub chunks_received: usize,

    /// Inbound chunks that failed to decode
    pub decode_errors: usize,

    /// Interruptions signalled by the model
    pub interruptions: usize,

    /// Completed model turns
    pub turns: usize,

    /// Total seconds of model audio scheduled for playback
    pub audio_scheduled_secs: f64,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub role: String,
    pub state: SessionState,
    pub stats: SessionStats,
    /// Buffers scheduled and not yet finished
    pub playback_queue_len: usize,
    /// Output clock time the next chunk would start at, at the earliest
    pub next_playback_time: f64,
    pub error: Option<String>,
}

/// What a finished session hands back to its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub role: String,
    pub state: SessionState,
    pub stats: SessionStats,

    /// Transcript of the model's speech, one entry per turn
    pub transcript: Vec<String>,

    /// The model's final words (its closing assessment when the interview
    /// ran to the end), if it said anything
    pub closing_remark: Option<String>,

    /// User-visible error, if the session failed
    pub error: Option<String>,
}
