//! Dashboard session lifecycle.
//!
//! A session waits for the upstream authorization signal, starts the
//! subscription manager once, and tears everything down when it ends:
//!
//! ```text
//! Unauthorized --authorized--> Starting --start returned--> Running
//!      ^                          |                            |
//!      +-------- revoked ---------+----------- revoked --------+
//! Starting / Running --teardown--> Stopped (final)
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::aggregation::{
    default_descriptors, validate_descriptors, AggregatorState, DescriptorError, FeedDescriptor,
    ReadinessPolicy, Statistics, StatsAggregator,
};
use crate::config::Settings;
use crate::feed::ChangeFeedBackend;
use crate::metrics::SessionMetrics;
use crate::subscription::{StopHandle, SubscriptionManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthorized,
    Starting,
    Running,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }

    /// Value exported on the session state gauge
    pub fn metric_value(&self) -> i64 {
        match self {
            Self::Unauthorized => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopped => 3,
        }
    }

    /// Subscriptions are (being) opened
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level owner of one dashboard's engine.
///
/// Each session has its own aggregator, so independent sessions never share
/// statistics.
pub struct DashboardSession {
    manager: Arc<SubscriptionManager>,
    descriptors: Vec<FeedDescriptor>,
    state: watch::Sender<SessionState>,
    stop_handle: Option<StopHandle>,
}

impl DashboardSession {
    pub fn new(
        backend: Arc<dyn ChangeFeedBackend>,
        descriptors: Vec<FeedDescriptor>,
        readiness: ReadinessPolicy,
    ) -> Result<Self, DescriptorError> {
        validate_descriptors(&descriptors)?;

        let aggregator = Arc::new(StatsAggregator::new());
        let manager = SubscriptionManager::new(backend, aggregator).with_readiness(readiness);
        let (state, _) = watch::channel(SessionState::Unauthorized);
        SessionMetrics::set_state(SessionState::Unauthorized.metric_value());

        Ok(Self {
            manager: Arc::new(manager),
            descriptors,
            state,
            stop_handle: None,
        })
    }

    /// Session over the dashboard's default feed set
    pub fn from_settings(
        backend: Arc<dyn ChangeFeedBackend>,
        settings: &Settings,
    ) -> Result<Self, DescriptorError> {
        Self::new(
            backend,
            default_descriptors(&settings.feeds),
            settings.dashboard.readiness,
        )
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that follows every state transition
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn manager(&self) -> &Arc<SubscriptionManager> {
        &self.manager
    }

    pub fn aggregator(&self) -> &Arc<StatsAggregator> {
        self.manager.aggregator()
    }

    pub fn descriptors(&self) -> &[FeedDescriptor] {
        &self.descriptors
    }

    pub fn statistics(&self) -> Statistics {
        self.aggregator().current()
    }

    /// Observer of the aggregated state
    pub fn observe(&self) -> watch::Receiver<AggregatorState> {
        self.aggregator().subscribe()
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        SessionMetrics::set_state(next.metric_value());
        if previous != next {
            tracing::info!(from = %previous, to = %next, "Dashboard session transition");
        }
    }

    /// Feed the current value of the authorization signal.
    ///
    /// Repeated values are no-ops. Revocation stops every subscription and
    /// clears the statistics; a later `true` starts from scratch. A stopped
    /// session ignores the signal.
    #[tracing::instrument(skip(self), fields(state = %self.state()))]
    pub async fn set_authorized(&mut self, authorized: bool) -> SessionState {
        match (self.state(), authorized) {
            (SessionState::Stopped, _) => {}
            (SessionState::Unauthorized, true) => self.start().await,
            (SessionState::Starting | SessionState::Running, false) => {
                self.stop_subscriptions();
                self.aggregator().reset();
                self.transition(SessionState::Unauthorized);
            }
            _ => {}
        }
        self.state()
    }

    async fn start(&mut self) {
        self.transition(SessionState::Starting);

        match self.manager.start(&self.descriptors).await {
            Ok(handle) => {
                self.stop_handle = Some(handle);
                self.transition(SessionState::Running);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start feed subscriptions");
                self.transition(SessionState::Unauthorized);
            }
        }
    }

    fn stop_subscriptions(&mut self) {
        if let Some(handle) = self.stop_handle.take() {
            handle.stop();
        }
    }

    /// End the session. Final: nothing restarts a stopped session.
    pub fn teardown(&mut self) -> SessionState {
        if self.state() != SessionState::Stopped {
            self.stop_subscriptions();
            self.transition(SessionState::Stopped);
        }
        SessionState::Stopped
    }

    /// Drive the session from the authorization signal until shutdown or
    /// until the signal's sender goes away, then tear down.
    pub async fn run(
        mut self,
        mut authorized: watch::Receiver<bool>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> SessionState {
        let initial = *authorized.borrow_and_update();
        self.set_authorized(initial).await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("Dashboard session received shutdown signal");
                    break;
                }
                changed = authorized.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Authorization signal closed");
                        break;
                    }
                    let value = *authorized.borrow_and_update();
                    self.set_authorized(value).await;
                }
            }
        }

        self.teardown()
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        self.stop_subscriptions();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedSettings;
    use crate::feed::MemoryFeedBackend;

    fn session(backend: &Arc<MemoryFeedBackend>) -> DashboardSession {
        DashboardSession::new(
            backend.clone(),
            default_descriptors(&FeedSettings::default()),
            ReadinessPolicy::SetupComplete,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_authorization_starts_once() {
        let backend = Arc::new(MemoryFeedBackend::new());
        let mut session = session(&backend);
        assert_eq!(session.state(), SessionState::Unauthorized);

        assert_eq!(session.set_authorized(true).await, SessionState::Running);
        assert_eq!(session.set_authorized(true).await, SessionState::Running);

        assert_eq!(backend.open_count("users"), 1);
        assert!(!session.aggregator().is_loading());
    }

    #[tokio::test]
    async fn test_unauthorized_false_is_noop() {
        let backend = Arc::new(MemoryFeedBackend::new());
        let mut session = session(&backend);

        assert_eq!(session.set_authorized(false).await, SessionState::Unauthorized);
        assert_eq!(backend.open_count("users"), 0);
    }

    #[tokio::test]
    async fn test_revocation_stops_and_resets() {
        let backend = Arc::new(MemoryFeedBackend::new());
        backend.replace("flags", vec![crate::feed::Document::new("f1")]);
        let mut session = session(&backend);
        session.set_authorized(true).await;

        let mut observer = session.observe();
        observer
            .wait_for(|state| state.statistics.total_flags == 1)
            .await
            .unwrap();

        assert_eq!(session.set_authorized(false).await, SessionState::Unauthorized);
        assert_eq!(backend.active_subscribers("flags"), 0);
        assert_eq!(session.statistics(), Statistics::default());
        assert!(session.aggregator().is_loading());

        assert_eq!(session.set_authorized(true).await, SessionState::Running);
        assert_eq!(backend.open_count("flags"), 2);
    }

    #[tokio::test]
    async fn test_teardown_is_final() {
        let backend = Arc::new(MemoryFeedBackend::new());
        let mut session = session(&backend);
        session.set_authorized(true).await;

        assert_eq!(session.teardown(), SessionState::Stopped);
        assert_eq!(session.teardown(), SessionState::Stopped);
        assert_eq!(session.set_authorized(true).await, SessionState::Stopped);
        assert_eq!(backend.active_subscribers("users"), 0);
        assert_eq!(backend.open_count("users"), 1);
    }

    #[test]
    fn test_state_metric_values_and_names() {
        assert_eq!(SessionState::Unauthorized.metric_value(), 0);
        assert_eq!(SessionState::Stopped.metric_value(), 3);
        assert_eq!(SessionState::Running.to_string(), "running");
        assert!(SessionState::Starting.is_active());
        assert!(!SessionState::Stopped.is_active());
    }
}
