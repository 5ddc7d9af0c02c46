use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::StreamMap;

use crate::aggregation::{AggregationRule, ReadinessPolicy, StatsAggregator};
use crate::feed::{FeedError, FeedEvent, FeedSubscription, Snapshot, SubscriptionHandle};
use crate::metrics::FeedMetrics;

use super::health::FeedHealthRegistry;

/// Where a feed's snapshots go
pub(crate) struct Route {
    pub rule: Arc<dyn AggregationRule>,
    pub handle: SubscriptionHandle,
}

/// Background task that owns every open subscription of one `start`.
///
/// All feeds are polled from this single task, so merges never run in
/// parallel and each feed's snapshots are merged in delivery order.
pub(crate) struct EngineTask {
    streams: StreamMap<String, FeedSubscription>,
    routes: HashMap<String, Route>,
    aggregator: Arc<StatsAggregator>,
    health: Arc<FeedHealthRegistry>,
    readiness: ReadinessPolicy,
    /// Feeds that have not delivered yet (FirstSnapshot readiness)
    awaiting_first: HashSet<String>,
    shutdown: broadcast::Receiver<()>,
}

impl EngineTask {
    pub fn new(
        aggregator: Arc<StatsAggregator>,
        health: Arc<FeedHealthRegistry>,
        readiness: ReadinessPolicy,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            streams: StreamMap::new(),
            routes: HashMap::new(),
            aggregator,
            health,
            readiness,
            awaiting_first: HashSet::new(),
            shutdown,
        }
    }

    /// Feed that must deliver before the dashboard is ready
    pub fn expect_feed(&mut self, feed: &str) {
        self.awaiting_first.insert(feed.to_string());
    }

    pub fn add(&mut self, subscription: FeedSubscription, rule: Arc<dyn AggregationRule>) {
        let feed = subscription.feed().to_string();
        self.routes.insert(
            feed.clone(),
            Route {
                rule,
                handle: subscription.handle().clone(),
            },
        );
        self.streams.insert(feed, subscription);
    }

    pub async fn run(mut self) {
        tracing::debug!(feeds = self.streams.len(), "Aggregation engine started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!("Aggregation engine received shutdown signal");
                    break;
                }
                next = self.streams.next() => match next {
                    Some((feed, event)) => self.handle_event(&feed, event),
                    None => {
                        tracing::debug!("All feed streams ended");
                        break;
                    }
                },
            }
        }
    }

    fn handle_event(&mut self, feed: &str, event: FeedEvent) {
        let Some(route) = self.routes.get(feed) else {
            return;
        };

        match event {
            FeedEvent::Snapshot(snapshot) => {
                let handle = route.handle.clone();
                let rule = route.rule.clone();
                self.apply_snapshot(feed, &handle, rule.as_ref(), &snapshot);
            }
            FeedEvent::Error(error) => {
                if route.handle.is_cancelled() {
                    return;
                }
                report_feed_error(&self.health, &error);
            }
        }
    }

    fn apply_snapshot(
        &mut self,
        feed: &str,
        handle: &SubscriptionHandle,
        rule: &dyn AggregationRule,
        snapshot: &Snapshot,
    ) {
        let partial = rule.reduce(snapshot);
        if !self.aggregator.merge_from(handle, &partial) {
            return;
        }

        FeedMetrics::record_snapshot(feed, snapshot.len());
        self.health.record_snapshot(feed);
        tracing::debug!(
            feed = %feed,
            documents = snapshot.len(),
            "Merged feed snapshot"
        );

        if self.readiness == ReadinessPolicy::FirstSnapshot
            && self.awaiting_first.remove(feed)
            && self.awaiting_first.is_empty()
            && self.aggregator.mark_ready_from(handle)
        {
            tracing::info!("Every feed delivered its first snapshot, dashboard ready");
        }
    }
}

/// The logging sink for feed failures: never escalated past this point.
pub(crate) fn report_feed_error(health: &FeedHealthRegistry, error: &FeedError) {
    tracing::error!(
        feed = %error.feed(),
        kind = error.kind(),
        error = %error,
        "Feed subscription error"
    );
    FeedMetrics::record_error(error.feed());
    health.record_error(error);
}
