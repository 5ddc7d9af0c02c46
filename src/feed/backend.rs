//! Change feed backend trait definition

use async_trait::async_trait;
use serde::Serialize;

use super::subscription::FeedSubscription;
use super::types::FeedError;

/// Backend implementation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedBackendType {
    Memory,
    Redis,
}

impl FeedBackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

/// Source of live collection snapshots.
///
/// Contract every implementation must honour:
/// - the first event of a healthy subscription is the full current snapshot,
///   and every later change is delivered as another full snapshot;
/// - a failure is reported as one `FeedEvent::Error` per failure event and
///   does not end the subscription;
/// - after the subscription handle is cancelled nothing more is delivered.
#[async_trait]
pub trait ChangeFeedBackend: Send + Sync {
    /// Get the backend type
    fn backend_type(&self) -> FeedBackendType;

    /// Open a subscription to the named feed.
    ///
    /// An `Err` means the subscription could not be opened at all; the
    /// caller treats it like an error event on that feed.
    async fn subscribe(&self, feed: &str) -> Result<FeedSubscription, FeedError>;
}
