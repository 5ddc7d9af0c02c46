//! Per-feed health records.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::feed::FeedError;

/// What the engine knows about one feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedHealth {
    pub feed: String,
    /// A subscription to this feed is currently open
    pub subscribed: bool,
    pub snapshots: u64,
    pub errors: u64,
    pub last_error: Option<String>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl FeedHealth {
    fn new(feed: &str) -> Self {
        Self {
            feed: feed.to_string(),
            subscribed: false,
            snapshots: 0,
            errors: 0,
            last_error: None,
            last_snapshot_at: None,
            last_error_at: None,
        }
    }

    /// The most recent event from this feed was an error, so its counters
    /// may be out of date.
    pub fn is_stale(&self) -> bool {
        match (self.last_error_at, self.last_snapshot_at) {
            (Some(error_at), Some(snapshot_at)) => error_at >= snapshot_at,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Health records keyed by feed name
#[derive(Debug, Default)]
pub struct FeedHealthRegistry {
    feeds: DashMap<String, FeedHealth>,
}

impl FeedHealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a record exists for `feed`
    pub fn register(&self, feed: &str) {
        self.feeds
            .entry(feed.to_string())
            .or_insert_with(|| FeedHealth::new(feed));
    }

    pub fn set_subscribed(&self, feed: &str, subscribed: bool) {
        if let Some(mut health) = self.feeds.get_mut(feed) {
            health.subscribed = subscribed;
        }
    }

    pub fn unsubscribe_all(&self) {
        for mut health in self.feeds.iter_mut() {
            health.subscribed = false;
        }
    }

    pub fn record_snapshot(&self, feed: &str) {
        let mut health = self
            .feeds
            .entry(feed.to_string())
            .or_insert_with(|| FeedHealth::new(feed));
        health.snapshots += 1;
        health.last_snapshot_at = Some(Utc::now());
    }

    pub fn record_error(&self, error: &FeedError) {
        let feed = error.feed();
        let mut health = self
            .feeds
            .entry(feed.to_string())
            .or_insert_with(|| FeedHealth::new(feed));
        health.errors += 1;
        health.last_error = Some(error.to_string());
        health.last_error_at = Some(Utc::now());
    }

    pub fn get(&self, feed: &str) -> Option<FeedHealth> {
        self.feeds.get(feed).map(|h| h.clone())
    }

    /// All records, sorted by feed name
    pub fn all(&self) -> Vec<FeedHealth> {
        let mut all: Vec<FeedHealth> = self.feeds.iter().map(|h| h.clone()).collect();
        all.sort_by(|a, b| a.feed.cmp(&b.feed));
        all
    }

    /// Total errors across feeds
    pub fn total_errors(&self) -> u64 {
        self.feeds.iter().map(|h| h.errors).sum()
    }
}
