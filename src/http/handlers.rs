use super::state::{AppState, SessionHandle, SessionRegistry};
use crate::error::SessionError;
use crate::session::{JobRole, SessionOutcome, SessionStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartInterviewRequest {
    /// Target role, as a title ("Data Scientist") or slug ("data-scientist")
    pub role: String,

    /// Optional interviewer voice (defaults to the configured one)
    pub voice: Option<String>,

    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartInterviewResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn status_for(error: &SessionError) -> StatusCode {
    match error {
        SessionError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Connection(_) => StatusCode::BAD_GATEWAY,
        SessionError::InvalidState(_) => StatusCode::CONFLICT,
        SessionError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Drop sessions that ended on their own (remote close, failure)
fn prune(sessions: &mut SessionRegistry) {
    for id in sessions.prune_finished() {
        info!("Interview {} finished, removing it", id);
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /interviews/start
/// Start a live interview session
pub async fn start_interview(
    State(state): State<AppState>,
    Json(req): Json<StartInterviewRequest>,
) -> Response {
    let mut config = state
        .factory
        .session_config(JobRole::from(req.role.as_str()), req.voice);
    if let Some(id) = req.session_id {
        config.session_id = id;
    }
    let session_id = config.session_id.clone();

    info!("Starting interview {} for role {}", session_id, config.role);

    {
        let mut sessions = state.sessions.write().await;
        prune(&mut sessions);
        if !sessions.reserve(&session_id) {
            return error_response(
                StatusCode::CONFLICT,
                format!("Interview {} already exists", session_id),
            );
        }
    }

    let mut session = match state.factory.create(config) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create session: {:#}", e);
            state.sessions.write().await.release(&session_id);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create session: {:#}", e),
            );
        }
    };

    let status = session.watch_status();

    if let Err(e) = session.start().await {
        error!("Failed to start interview {}: {}", session_id, e);
        session.stop();
        state.sessions.write().await.release(&session_id);
        return error_response(status_for(&e), e.to_string());
    }

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        session
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
    });

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(
            session_id.clone(),
            SessionHandle {
                stop: stop_tx,
                status,
                task,
            },
        );
    }

    info!("Interview {} is live", session_id);

    (
        StatusCode::OK,
        Json(StartInterviewResponse {
            session_id: session_id.clone(),
            status: "active".to_string(),
            message: format!("Interview {} started", session_id),
        }),
    )
        .into_response()
}

/// POST /interviews/stop/:session_id
/// Stop an interview and return its outcome
pub async fn stop_interview(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    info!("Stopping interview {}", session_id);

    let handle = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id)
    };

    let Some(handle) = handle else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Interview {} not found", session_id),
        );
    };

    // Already finished on its own if the receiver is gone
    let _ = handle.stop.send(());

    match handle.task.await {
        Ok(outcome) => {
            info!("Interview {} stopped ({})", session_id, outcome.state);
            (StatusCode::OK, Json::<SessionOutcome>(outcome)).into_response()
        }
        Err(e) => {
            error!("Interview task for {} failed: {}", session_id, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Interview task failed: {}", e),
            )
        }
    }
}

/// GET /interviews/:session_id/status
/// Latest status snapshot of an interview
pub async fn get_interview_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(handle) => {
            let status: SessionStatus = handle.status.borrow().clone();
            (StatusCode::OK, Json(status)).into_response()
        }
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Interview {} not found", session_id),
        ),
    }
}

/// GET /interviews
/// Status of every known interview
pub async fn list_interviews(State(state): State<AppState>) -> impl IntoResponse {
    let mut sessions = state.sessions.write().await;
    prune(&mut sessions);
    (StatusCode::OK, Json(sessions.statuses()))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
