use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Interview control
        .route("/interviews", get(handlers::list_interviews))
        .route("/interviews/start", post(handlers::start_interview))
        .route(
            "/interviews/stop/:session_id",
            post(handlers::stop_interview),
        )
        // Interview queries
        .route(
            "/interviews/:session_id/status",
            get(handlers::get_interview_status),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
