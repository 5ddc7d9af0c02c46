//! Subscription lifecycle: opening the configured feeds, routing their
//! snapshots into the aggregator, and tearing everything down once.

mod engine;
mod health;
mod manager;

pub use health::{FeedHealth, FeedHealthRegistry};
pub use manager::{StopHandle, SubscriptionManager};
