//! Merged dashboard state and its observers.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::feed::SubscriptionHandle;
use crate::metrics::AggregationMetrics;

use super::stats::{PartialStatistics, Statistics};

/// When the dashboard stops reporting `is_loading`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessPolicy {
    /// Ready as soon as every feed has been subscribed
    #[default]
    SetupComplete,
    /// Ready once every feed has delivered at least one snapshot
    FirstSnapshot,
}

/// Statistics plus the loading flag, as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorState {
    pub statistics: Statistics,
    pub is_loading: bool,
}

impl Default for AggregatorState {
    fn default() -> Self {
        Self {
            statistics: Statistics::default(),
            is_loading: true,
        }
    }
}

/// Single owner of the merged dashboard statistics.
///
/// State lives in a `watch` channel: every applied merge notifies observers
/// with the full new state, and slow observers only ever see the latest value.
#[derive(Debug)]
pub struct StatsAggregator {
    state: watch::Sender<AggregatorState>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AggregatorState::default());
        Self { state }
    }

    /// Field-wise overwrite of the stored statistics
    pub fn merge(&self, partial: &PartialStatistics) {
        self.state.send_modify(|state| state.statistics.apply(partial));
        AggregationMetrics::record_merge();
    }

    /// Merge on behalf of a subscription.
    ///
    /// The cancelled flag is read under the state lock, so a merge either
    /// lands before a fenced `cancel` returns or not at all.
    pub fn merge_from(&self, handle: &SubscriptionHandle, partial: &PartialStatistics) -> bool {
        let applied = self.state.send_if_modified(|state| {
            if handle.is_cancelled() {
                return false;
            }
            state.statistics.apply(partial);
            true
        });

        if applied {
            AggregationMetrics::record_merge();
        } else {
            AggregationMetrics::record_dropped();
            tracing::trace!(
                feed = %handle.feed(),
                subscription_id = %handle.id(),
                "Dropped snapshot from cancelled subscription"
            );
        }
        applied
    }

    /// Run `f` while holding the state lock, without notifying observers.
    ///
    /// `f` must not call back into this aggregator.
    pub fn fenced(&self, f: impl FnOnce()) {
        self.state.send_if_modified(|_| {
            f();
            false
        });
    }

    /// Clear the loading flag. Returns `true` if it was set.
    pub fn mark_ready(&self) -> bool {
        self.state.send_if_modified(|state| {
            if !state.is_loading {
                return false;
            }
            state.is_loading = false;
            true
        })
    }

    /// `mark_ready` on behalf of a subscription; a cancelled one leaves the
    /// flag alone, checked under the state lock like `merge_from`.
    pub fn mark_ready_from(&self, handle: &SubscriptionHandle) -> bool {
        self.state.send_if_modified(|state| {
            if handle.is_cancelled() || !state.is_loading {
                return false;
            }
            state.is_loading = false;
            true
        })
    }

    /// Back to zeroed statistics and loading
    pub fn reset(&self) {
        self.state.send_modify(|state| *state = AggregatorState::default());
    }

    pub fn current(&self) -> Statistics {
        self.state.borrow().statistics
    }

    pub fn state(&self) -> AggregatorState {
        *self.state.borrow()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    /// New observer; the current state counts as already seen
    pub fn subscribe(&self) -> watch::Receiver<AggregatorState> {
        self.state.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.state.receiver_count()
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
