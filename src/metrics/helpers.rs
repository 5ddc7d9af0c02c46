//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    ACTIVE_SUBSCRIPTIONS, FEED_ERRORS_TOTAL, FEED_SNAPSHOTS_TOTAL, FEED_SNAPSHOT_DOCUMENTS,
    MERGES_DROPPED_TOTAL, MERGES_TOTAL, SESSION_STATE,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording feed metrics
pub struct FeedMetrics;

impl FeedMetrics {
    /// Record a delivered snapshot
    pub fn record_snapshot(feed: &str, documents: usize) {
        FEED_SNAPSHOTS_TOTAL.with_label_values(&[feed]).inc();
        FEED_SNAPSHOT_DOCUMENTS
            .with_label_values(&[feed])
            .observe(documents as f64);
    }

    /// Record a feed subscription error
    pub fn record_error(feed: &str) {
        FEED_ERRORS_TOTAL.with_label_values(&[feed]).inc();
    }

    pub fn subscriptions_opened(count: usize) {
        ACTIVE_SUBSCRIPTIONS.add(count as i64);
    }

    pub fn subscriptions_closed(count: usize) {
        ACTIVE_SUBSCRIPTIONS.sub(count as i64);
    }
}

/// Helper struct for aggregation metrics
pub struct AggregationMetrics;

impl AggregationMetrics {
    pub fn record_merge() {
        MERGES_TOTAL.inc();
    }

    /// Record a merge discarded because its subscription was cancelled
    pub fn record_dropped() {
        MERGES_DROPPED_TOTAL.inc();
    }
}

/// Helper struct for session metrics
pub struct SessionMetrics;

impl SessionMetrics {
    pub fn set_state(value: i64) {
        SESSION_STATE.set(value);
    }
}
