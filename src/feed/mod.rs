//! Change feed subscriptions.
//!
//! A feed is a named, continuously updating document collection. Backends
//! implement [`ChangeFeedBackend`] and hand out [`FeedSubscription`]s, each an
//! ordered stream of full snapshots and errors plus a cancellation handle.
//!
//! - `MemoryFeedBackend`: in-process collections (default, used by tests)
//! - `RedisFeedBackend`: snapshots stored in Redis, changes via pub/sub
//!
//! Use `create_feed_backend()` to pick one from configuration.

mod backend;
mod backoff;
mod factory;
mod memory_backend;
mod redis_backend;
mod subscription;
mod types;

pub use backend::{ChangeFeedBackend, FeedBackendType};
pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use factory::create_feed_backend;
pub use memory_backend::MemoryFeedBackend;
pub use redis_backend::RedisFeedBackend;
pub use subscription::{FeedSubscription, SubscriptionHandle};
pub use types::{Document, FeedError, FeedEvent, Snapshot};
