//! Live interview session management
//!
//! This module provides the `LiveSession` abstraction that manages:
//! - Microphone capture and transport encoding of outbound audio
//! - The connection to the remote conversational endpoint
//! - Gapless scheduling of streamed model audio, and interruption
//! - Teardown of every device and connection on stop, error or drop

mod config;
mod prompt;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use prompt::{interviewer_instruction, JobRole};
pub use session::LiveSession;
pub use state::SessionState;
pub use stats::{SessionOutcome, SessionStats, SessionStatus};
