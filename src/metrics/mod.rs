//! Prometheus metrics for the dashboard service.
//!
//! - Feed metrics (snapshots received, errors reported, snapshot sizes)
//! - Aggregation metrics (merges applied)
//! - Lifecycle metrics (active subscriptions, session state)

mod helpers;

pub use helpers::{encode_metrics, AggregationMetrics, FeedMetrics, SessionMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "dashboard";

lazy_static! {
    // ============================================================================
    // Feed Metrics
    // ============================================================================

    /// Snapshots received per feed
    pub static ref FEED_SNAPSHOTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_feed_snapshots_total", METRIC_PREFIX),
        "Total snapshots received per feed",
        &["feed"]
    ).unwrap();

    /// Feed subscription errors per feed
    pub static ref FEED_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_feed_errors_total", METRIC_PREFIX),
        "Total feed subscription errors per feed",
        &["feed"]
    ).unwrap();

    /// Documents per delivered snapshot
    pub static ref FEED_SNAPSHOT_DOCUMENTS: HistogramVec = register_histogram_vec!(
        format!("{}_feed_snapshot_documents", METRIC_PREFIX),
        "Distribution of documents per delivered snapshot",
        &["feed"],
        vec![0.0, 1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0]
    ).unwrap();

    // ============================================================================
    // Aggregation Metrics
    // ============================================================================

    /// Partial updates merged into the statistics
    pub static ref MERGES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_merges_total", METRIC_PREFIX),
        "Total partial statistics merged"
    ).unwrap();

    /// Merges dropped because their subscription was already cancelled
    pub static ref MERGES_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_merges_dropped_total", METRIC_PREFIX),
        "Total partial statistics dropped after cancellation"
    ).unwrap();

    // ============================================================================
    // Lifecycle Metrics
    // ============================================================================

    /// Currently open feed subscriptions
    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge = register_int_gauge!(
        format!("{}_active_subscriptions", METRIC_PREFIX),
        "Number of open feed subscriptions"
    ).unwrap();

    /// Session state (0 unauthorized, 1 starting, 2 running, 3 stopped)
    pub static ref SESSION_STATE: IntGauge = register_int_gauge!(
        format!("{}_session_state", METRIC_PREFIX),
        "Current dashboard session state"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered() {
        FeedMetrics::record_snapshot("metrics-test", 3);
        FeedMetrics::record_error("metrics-test");
        AggregationMetrics::record_merge();

        let output = encode_metrics().unwrap();
        assert!(output.contains("dashboard_feed_snapshots_total"));
        assert!(output.contains("dashboard_feed_errors_total"));
        assert!(output.contains("dashboard_merges_total"));
    }
}
