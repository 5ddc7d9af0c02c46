//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;
use crate::session::SessionState;
use crate::subscription::FeedHealth;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy", "degraded" (some feed's last event was an error) or "idle"
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub session: SessionState,
    pub backend: String,
    pub is_loading: bool,
    pub feeds: Vec<FeedHealth>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let session = state.session_state();
    let feeds = state.manager.feed_health();

    let status = if session != SessionState::Running {
        "idle"
    } else if feeds.iter().any(FeedHealth::is_stale) {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        session,
        backend: state.backend_type.as_str().to_string(),
        is_loading: state.aggregator.is_loading(),
        feeds,
    })
}
