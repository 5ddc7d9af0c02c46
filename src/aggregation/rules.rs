//! Aggregation rules: pure functions from a feed snapshot to the counters
//! that feed owns.

use std::fmt;

use smallvec::SmallVec;

use crate::feed::{Document, Snapshot};

use super::stats::{Counter, PartialStatistics};

/// Verification status of an account awaiting review
pub const STATUS_PENDING: &str = "pending_verification";
/// Verification status of an approved account
pub const STATUS_APPROVED: &str = "approved_username_assigned";
/// Verification status of a rejected account
pub const STATUS_REJECTED: &str = "rejected";

/// Maps a full snapshot to a partial statistics update.
///
/// Implementations must be pure: the same snapshot always yields the same
/// partial, and the partial only ever contains `owned_counters()`.
pub trait AggregationRule: Send + Sync + fmt::Debug {
    /// Counters this rule writes
    fn owned_counters(&self) -> &[Counter];

    fn reduce(&self, snapshot: &Snapshot) -> PartialStatistics;
}

/// `{ counter: size(snapshot) }`
#[derive(Debug, Clone)]
pub struct CountingRule {
    counter: [Counter; 1],
}

impl CountingRule {
    pub fn new(counter: Counter) -> Self {
        Self { counter: [counter] }
    }
}

impl AggregationRule for CountingRule {
    fn owned_counters(&self) -> &[Counter] {
        &self.counter
    }

    fn reduce(&self, snapshot: &Snapshot) -> PartialStatistics {
        PartialStatistics::new().with(self.counter[0], snapshot.len() as u64)
    }
}

/// One status value and the counter it feeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBucket {
    pub status: String,
    pub counter: Counter,
}

/// Partitions documents by a status field into named buckets.
///
/// Documents whose status is missing, not a string, or not one of the
/// bucket values are left out of every bucket. Bucket counts are always
/// recomputed from the whole snapshot.
#[derive(Debug, Clone)]
pub struct ClassifyingRule {
    status_field: String,
    buckets: Vec<StatusBucket>,
    counters: Vec<Counter>,
}

impl ClassifyingRule {
    pub fn new<S: Into<String>>(
        status_field: impl Into<String>,
        buckets: impl IntoIterator<Item = (S, Counter)>,
    ) -> Self {
        let buckets: Vec<StatusBucket> = buckets
            .into_iter()
            .map(|(status, counter)| StatusBucket {
                status: status.into(),
                counter,
            })
            .collect();
        let counters = buckets.iter().map(|b| b.counter).collect();

        Self {
            status_field: status_field.into(),
            buckets,
            counters,
        }
    }

    /// pending / approved / rejected user verification buckets
    pub fn user_verification(status_field: impl Into<String>) -> Self {
        Self::new(
            status_field,
            [
                (STATUS_PENDING, Counter::PendingUsers),
                (STATUS_APPROVED, Counter::ApprovedUsers),
                (STATUS_REJECTED, Counter::RejectedUsers),
            ],
        )
    }

    pub fn status_field(&self) -> &str {
        &self.status_field
    }

    pub fn buckets(&self) -> &[StatusBucket] {
        &self.buckets
    }

    /// Index of the bucket the document falls into, if any
    fn bucket_index(&self, document: &Document) -> Option<usize> {
        let status = document.get_str(&self.status_field)?;
        self.buckets.iter().position(|b| b.status == status)
    }

    /// Counter the document is counted under, if any
    pub fn classify(&self, document: &Document) -> Option<Counter> {
        self.bucket_index(document).map(|i| self.buckets[i].counter)
    }
}

impl AggregationRule for ClassifyingRule {
    fn owned_counters(&self) -> &[Counter] {
        &self.counters
    }

    fn reduce(&self, snapshot: &Snapshot) -> PartialStatistics {
        let mut counts: SmallVec<[u64; 3]> = SmallVec::from_elem(0, self.buckets.len());
        let mut unclassified = 0usize;

        for document in snapshot.iter() {
            match self.bucket_index(document) {
                Some(i) => counts[i] += 1,
                None => unclassified += 1,
            }
        }

        if unclassified > 0 {
            tracing::trace!(
                feed = %snapshot.feed,
                status_field = %self.status_field,
                unclassified = unclassified,
                "Documents with unrecognized status left out of all buckets"
            );
        }

        self.buckets
            .iter()
            .zip(counts)
            .fold(PartialStatistics::new(), |partial, (bucket, count)| {
                partial.with(bucket.counter, count)
            })
    }
}
