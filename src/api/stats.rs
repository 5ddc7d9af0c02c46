//! Current dashboard statistics.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::aggregation::{AggregatorState, Statistics};
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::session::SessionState;

/// Full dashboard state as served to observers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub statistics: Statistics,
    /// approved + pending
    pub total_users: u64,
    pub is_loading: bool,
}

impl From<AggregatorState> for StatsResponse {
    fn from(state: AggregatorState) -> Self {
        Self {
            total_users: state.statistics.total_users(),
            statistics: state.statistics,
            is_loading: state.is_loading,
        }
    }
}

/// GET /api/v1/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let session = state.session_state();
    if session != SessionState::Running {
        return Err(AppError::NotReady(format!("Dashboard session is {}", session)));
    }

    Ok(Json(StatsResponse::from(state.aggregator.state())))
}
