use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use crate::aggregation::StatsAggregator;
use crate::config::Settings;
use crate::feed::FeedBackendType;
use crate::session::{DashboardSession, SessionState};
use crate::subscription::SubscriptionManager;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub session_state: watch::Receiver<SessionState>,
    pub aggregator: Arc<StatsAggregator>,
    pub manager: Arc<SubscriptionManager>,
    pub backend_type: FeedBackendType,
    pub start_time: Instant,
}

impl AppState {
    /// Read-only view of a session for the HTTP handlers
    pub fn new(settings: Settings, session: &DashboardSession, backend_type: FeedBackendType) -> Self {
        Self {
            settings: Arc::new(settings),
            session_state: session.watch_state(),
            aggregator: session.aggregator().clone(),
            manager: session.manager().clone(),
            backend_type,
            start_time: Instant::now(),
        }
    }

    pub fn session_state(&self) -> SessionState {
        *self.session_state.borrow()
    }
}
