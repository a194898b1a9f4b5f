//! HTTP API server for driving interview sessions
//!
//! - POST /interviews/start - Start a new interview
//! - POST /interviews/stop/:id - Stop an interview and return its outcome
//! - GET /interviews/:id/status - Query session status
//! - GET /interviews - List known interviews
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{StartInterviewRequest, StartInterviewResponse};
pub use routes::create_router;
pub use state::{AppState, SessionHandle, SessionRegistry};
