//! Statistics aggregation.
//!
//! Each feed's snapshots go through an [`AggregationRule`] that produces a
//! [`PartialStatistics`] covering only the counters that feed owns. The
//! [`StatsAggregator`] folds those partials into one [`Statistics`] value and
//! publishes it to observers.

mod aggregator;
mod descriptor;
mod rules;
mod stats;

pub use aggregator::{AggregatorState, ReadinessPolicy, StatsAggregator};
pub use descriptor::{default_descriptors, validate_descriptors, DescriptorError, FeedDescriptor};
pub use rules::{
    AggregationRule, ClassifyingRule, CountingRule, StatusBucket, STATUS_APPROVED, STATUS_PENDING,
    STATUS_REJECTED,
};
pub use stats::{Counter, PartialStatistics, Statistics};
