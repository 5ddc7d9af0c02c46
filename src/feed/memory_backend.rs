//! In-memory change feed backend using DashMap.
//!
//! Collections live in memory and every mutation pushes a full snapshot to
//! each live subscriber. Used for local runs and as the test double for the
//! aggregation engine.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::backend::{ChangeFeedBackend, FeedBackendType};
use super::subscription::{FeedSubscription, SubscriptionHandle};
use super::types::{Document, FeedError, FeedEvent, Snapshot};

struct Subscriber {
    id: Uuid,
    sender: mpsc::UnboundedSender<FeedEvent>,
}

#[derive(Default)]
struct Collection {
    documents: Vec<Document>,
    subscribers: Vec<Subscriber>,
}

impl Collection {
    /// Send an event to every subscriber, pruning closed ones.
    /// Returns the number of subscribers reached.
    fn broadcast(&mut self, event: &FeedEvent) -> usize {
        self.subscribers
            .retain(|subscriber| subscriber.sender.send(event.clone()).is_ok());
        self.subscribers.len()
    }
}

/// In-memory change feed backend.
pub struct MemoryFeedBackend {
    /// feed name -> documents and live subscribers
    collections: Arc<DashMap<String, Collection>>,
    /// feed name -> number of subscribe calls
    opens: DashMap<String, usize>,
    /// feed name -> error delivered instead of the initial snapshot
    denied: DashMap<String, FeedError>,
}

impl MemoryFeedBackend {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(DashMap::new()),
            opens: DashMap::new(),
            denied: DashMap::new(),
        }
    }

    /// Replace the whole collection and notify subscribers
    pub fn replace(&self, feed: &str, documents: Vec<Document>) -> usize {
        let mut collection = self.collections.entry(feed.to_string()).or_default();
        collection.documents = documents;
        Self::publish(feed, &mut collection)
    }

    /// Insert or update a document (matched by id) and notify subscribers
    pub fn upsert(&self, feed: &str, document: Document) -> usize {
        let mut collection = self.collections.entry(feed.to_string()).or_default();
        match collection.documents.iter().position(|d| d.id == document.id) {
            Some(pos) => collection.documents[pos] = document,
            None => collection.documents.push(document),
        }
        Self::publish(feed, &mut collection)
    }

    /// Remove a document by id. Subscribers are only notified if something
    /// was actually removed.
    pub fn remove(&self, feed: &str, id: &str) -> bool {
        let Some(mut collection) = self.collections.get_mut(feed) else {
            return false;
        };
        let before = collection.documents.len();
        collection.documents.retain(|d| d.id != id);
        if collection.documents.len() == before {
            return false;
        }
        Self::publish(feed, &mut collection);
        true
    }

    /// Deliver one error event to every subscriber of the feed
    pub fn fail(&self, feed: &str, error: FeedError) -> usize {
        let mut collection = self.collections.entry(feed.to_string()).or_default();
        let reached = collection.broadcast(&FeedEvent::Error(error));
        tracing::debug!(feed = %feed, subscribers = reached, "Injected feed error");
        reached
    }

    /// Make subsequent subscriptions to `feed` open with `error` instead of
    /// an initial snapshot. They stay registered and receive later changes.
    pub fn deny(&self, feed: &str, error: FeedError) {
        self.denied.insert(feed.to_string(), error);
    }

    /// Undo `deny`
    pub fn allow(&self, feed: &str) {
        self.denied.remove(feed);
    }

    /// Number of subscribe calls made for `feed`
    pub fn open_count(&self, feed: &str) -> usize {
        self.opens.get(feed).map(|count| *count).unwrap_or(0)
    }

    /// Number of currently registered subscribers for `feed`
    pub fn active_subscribers(&self, feed: &str) -> usize {
        self.collections
            .get(feed)
            .map(|c| c.subscribers.iter().filter(|s| !s.sender.is_closed()).count())
            .unwrap_or(0)
    }

    fn publish(feed: &str, collection: &mut Collection) -> usize {
        let snapshot = Snapshot::new(feed, collection.documents.clone());
        let reached = collection.broadcast(&FeedEvent::Snapshot(snapshot));
        tracing::trace!(
            feed = %feed,
            documents = collection.documents.len(),
            subscribers = reached,
            "Published feed snapshot"
        );
        reached
    }
}

impl Default for MemoryFeedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeedBackend for MemoryFeedBackend {
    fn backend_type(&self) -> FeedBackendType {
        FeedBackendType::Memory
    }

    async fn subscribe(&self, feed: &str) -> Result<FeedSubscription, FeedError> {
        *self.opens.entry(feed.to_string()).or_insert(0) += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        {
            let mut collection = self.collections.entry(feed.to_string()).or_default();
            let first = match self.denied.get(feed) {
                Some(error) => FeedEvent::Error(error.clone()),
                None => FeedEvent::Snapshot(Snapshot::new(feed, collection.documents.clone())),
            };
            // The receiver is still in scope, so this cannot fail
            let _ = tx.send(first);
            collection.subscribers.push(Subscriber { id, sender: tx });
        }

        let collections = Arc::clone(&self.collections);
        let name = feed.to_string();
        let handle = SubscriptionHandle::with_cancel_hook(feed, move || {
            if let Some(mut collection) = collections.get_mut(&name) {
                collection.subscribers.retain(|s| s.id != id);
            }
        });

        tracing::debug!(feed = %feed, subscription_id = %handle.id(), "Memory feed subscribed");

        Ok(FeedSubscription::from_unbounded(handle, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn docs(n: usize) -> Vec<Document> {
        (0..n).map(|i| Document::new(format!("d{}", i))).collect()
    }

    async fn next_snapshot(sub: &mut FeedSubscription) -> Snapshot {
        match sub.next().await {
            Some(FeedEvent::Snapshot(s)) => s,
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_snapshot_on_subscribe() {
        let backend = MemoryFeedBackend::new();
        backend.replace("profiles", docs(5));

        let mut sub = backend.subscribe("profiles").await.unwrap();
        let snapshot = next_snapshot(&mut sub).await;

        assert_eq!(snapshot.feed, "profiles");
        assert_eq!(snapshot.len(), 5);
        assert_eq!(backend.open_count("profiles"), 1);
    }

    #[tokio::test]
    async fn test_every_change_delivers_full_snapshot() {
        let backend = MemoryFeedBackend::new();
        let mut sub = backend.subscribe("comments").await.unwrap();
        assert!(next_snapshot(&mut sub).await.is_empty());

        backend.upsert("comments", Document::new("c1"));
        backend.upsert("comments", Document::new("c2"));
        backend.upsert("comments", Document::new("c1").with_field("edited", true));

        assert_eq!(next_snapshot(&mut sub).await.len(), 1);
        assert_eq!(next_snapshot(&mut sub).await.len(), 2);
        let latest = next_snapshot(&mut sub).await;
        assert_eq!(latest.len(), 2);
        assert_eq!(latest.documents[0].get("edited"), Some(&serde_json::json!(true)));

        assert!(backend.remove("comments", "c2"));
        assert!(!backend.remove("comments", "missing"));
        assert_eq!(next_snapshot(&mut sub).await.len(), 1);
    }

    #[tokio::test]
    async fn test_denied_feed_opens_with_error_then_recovers() {
        let backend = MemoryFeedBackend::new();
        backend.deny(
            "flags",
            FeedError::PermissionDenied {
                feed: "flags".to_string(),
            },
        );

        let mut sub = backend.subscribe("flags").await.unwrap();
        match sub.next().await {
            Some(FeedEvent::Error(FeedError::PermissionDenied { feed })) => assert_eq!(feed, "flags"),
            other => panic!("expected error, got {:?}", other),
        }

        backend.allow("flags");
        backend.replace("flags", docs(2));
        assert_eq!(next_snapshot(&mut sub).await.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_unregisters_subscriber() {
        let backend = MemoryFeedBackend::new();
        let sub = backend.subscribe("users").await.unwrap();
        assert_eq!(backend.active_subscribers("users"), 1);

        sub.cancel();
        assert_eq!(backend.active_subscribers("users"), 0);
        assert_eq!(backend.replace("users", docs(1)), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned_on_publish() {
        let backend = MemoryFeedBackend::new();
        let sub = backend.subscribe("users").await.unwrap();
        drop(sub);

        assert_eq!(backend.replace("users", docs(1)), 0);
        assert_eq!(backend.active_subscribers("users"), 0);
    }
}
