//! Feed backend factory

use std::sync::Arc;

use crate::config::{FeedSettings, RedisConfig};

use super::backend::ChangeFeedBackend;
use super::memory_backend::MemoryFeedBackend;
use super::redis_backend::RedisFeedBackend;

/// Create a change feed backend based on configuration.
///
/// - `"redis"`: a `RedisFeedBackend`, falling back to memory if the Redis
///   URL cannot be parsed
/// - `"memory"` (default): an empty `MemoryFeedBackend`
pub fn create_feed_backend(feeds: &FeedSettings, redis: &RedisConfig) -> Arc<dyn ChangeFeedBackend> {
    match feeds.backend.as_str() {
        "redis" => match RedisFeedBackend::new(&redis.url, redis.prefix.clone(), feeds.channel_capacity) {
            Ok(backend) => {
                tracing::info!(
                    backend = "redis",
                    prefix = %redis.prefix,
                    "Creating Redis feed backend"
                );
                Arc::new(backend)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Redis feed backend requested but not usable, falling back to memory"
                );
                Arc::new(MemoryFeedBackend::new())
            }
        },
        _ => {
            tracing::info!(backend = "memory", "Creating memory feed backend");
            Arc::new(MemoryFeedBackend::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedBackendType;

    #[test]
    fn test_default_is_memory() {
        let backend = create_feed_backend(&FeedSettings::default(), &RedisConfig::default());
        assert_eq!(backend.backend_type(), FeedBackendType::Memory);
    }

    #[test]
    fn test_redis_backend() {
        let feeds = FeedSettings {
            backend: "redis".to_string(),
            ..Default::default()
        };
        let backend = create_feed_backend(&feeds, &RedisConfig::default());
        assert_eq!(backend.backend_type(), FeedBackendType::Redis);
    }

    #[test]
    fn test_bad_redis_url_falls_back_to_memory() {
        let feeds = FeedSettings {
            backend: "redis".to_string(),
            ..Default::default()
        };
        let redis = RedisConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        let backend = create_feed_backend(&feeds, &redis);
        assert_eq!(backend.backend_type(), FeedBackendType::Memory);
    }
}
