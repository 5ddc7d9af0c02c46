//! Redis-backed change feed.
//!
//! Each feed keeps its current snapshot as JSON under `{prefix}:{feed}` and
//! announces every change on the pub/sub channel `{prefix}:{feed}:changed`,
//! carrying the full new snapshot:
//!
//! ```json
//! {"documents": [{"id": "u1", "verificationStatus": "pending_verification"}]}
//! ```
//!
//! A subscription runs one forwarding task. Connection failures are reported
//! as error events and the task reconnects with exponential backoff; it stops
//! when the subscription handle is cancelled or dropped.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use super::backend::{ChangeFeedBackend, FeedBackendType};
use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::subscription::{FeedSubscription, SubscriptionHandle};
use super::types::{Document, FeedError, FeedEvent, Snapshot};

/// Wire format of stored and published snapshots
#[derive(Debug, Deserialize)]
struct SnapshotPayload {
    #[serde(default)]
    documents: Vec<Document>,
}

/// Redis change feed backend
pub struct RedisFeedBackend {
    client: redis::Client,
    prefix: String,
    channel_capacity: usize,
    backoff: BackoffConfig,
}

impl RedisFeedBackend {
    pub fn new(url: &str, prefix: impl Into<String>, channel_capacity: usize) -> Result<Self, FeedError> {
        let client = redis::Client::open(url).map_err(|e| FeedError::Unavailable {
            feed: "*".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            prefix: prefix.into(),
            channel_capacity: channel_capacity.max(1),
            backoff: BackoffConfig::default(),
        })
    }

    /// Override the reconnection backoff
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn snapshot_key(&self, feed: &str) -> String {
        format!("{}:{}", self.prefix, feed)
    }

    pub fn change_channel(&self, feed: &str) -> String {
        format!("{}:{}:changed", self.prefix, feed)
    }
}

#[async_trait]
impl ChangeFeedBackend for RedisFeedBackend {
    fn backend_type(&self) -> FeedBackendType {
        FeedBackendType::Redis
    }

    async fn subscribe(&self, feed: &str) -> Result<FeedSubscription, FeedError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let worker = FeedWorker {
            client: self.client.clone(),
            feed: feed.to_string(),
            key: self.snapshot_key(feed),
            channel: self.change_channel(feed),
            tx,
        };
        let backoff = ExponentialBackoff::with_config(self.backoff.clone());
        tokio::spawn(worker.run(backoff, cancel_rx));

        let handle = SubscriptionHandle::with_cancel_hook(feed, move || {
            let _ = cancel_tx.send(true);
        });

        tracing::debug!(
            feed = %feed,
            key = %self.snapshot_key(feed),
            channel = %self.change_channel(feed),
            "Redis feed subscribed"
        );

        Ok(FeedSubscription::from_receiver(handle, rx))
    }
}

/// Forwards one feed from Redis into a subscription channel
struct FeedWorker {
    client: redis::Client,
    feed: String,
    key: String,
    channel: String,
    tx: mpsc::Sender<FeedEvent>,
}

impl FeedWorker {
    async fn run(self, mut backoff: ExponentialBackoff, mut cancel: watch::Receiver<bool>) {
        loop {
            // A dropped handle closes the watch channel, which also ends the task.
            let outcome = tokio::select! {
                _ = cancel.changed() => break,
                outcome = self.stream_once(&mut backoff) => outcome,
            };

            let error = match outcome {
                Ok(()) => break,
                Err(error) => error,
            };

            if self.tx.send(FeedEvent::Error(error.clone())).await.is_err() {
                break;
            }

            let delay = backoff.next_delay();
            tracing::warn!(
                feed = %self.feed,
                error = %error,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Redis feed failed, reconnecting"
            );

            tokio::select! {
                _ = cancel.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!(feed = %self.feed, "Redis feed worker stopped");
    }

    /// Stream until the connection fails (`Err`) or the subscriber goes away (`Ok`)
    async fn stream_once(&self, backoff: &mut ExponentialBackoff) -> Result<(), FeedError> {
        // Subscribe before reading the stored snapshot so no change slips between them.
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| self.transport(e))?;
        pubsub
            .subscribe(self.channel.as_str())
            .await
            .map_err(|e| self.transport(e))?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| self.transport(e))?;
        let stored: Option<String> = conn
            .get(self.key.as_str())
            .await
            .map_err(|e| self.transport(e))?;

        let initial = match stored {
            Some(payload) => self.decode(&payload)?,
            None => Snapshot::new(self.feed.as_str(), Vec::new()),
        };
        if self.tx.send(FeedEvent::Snapshot(initial)).await.is_err() {
            return Ok(());
        }

        backoff.reset();
        tracing::info!(feed = %self.feed, channel = %self.channel, "Redis feed established");

        let mut messages = pubsub.into_on_message();
        while let Some(msg) = messages.next().await {
            let event = match msg.get_payload::<String>() {
                Ok(payload) => match self.decode(&payload) {
                    Ok(snapshot) => FeedEvent::Snapshot(snapshot),
                    Err(error) => FeedEvent::Error(error),
                },
                Err(e) => FeedEvent::Error(FeedError::Decode {
                    feed: self.feed.clone(),
                    reason: e.to_string(),
                }),
            };

            if self.tx.send(event).await.is_err() {
                return Ok(());
            }
        }

        Err(FeedError::Transport {
            feed: self.feed.clone(),
            reason: "pub/sub stream ended".to_string(),
        })
    }

    fn decode(&self, payload: &str) -> Result<Snapshot, FeedError> {
        decode_snapshot(&self.feed, payload)
    }

    fn transport(&self, error: redis::RedisError) -> FeedError {
        FeedError::Transport {
            feed: self.feed.clone(),
            reason: error.to_string(),
        }
    }
}

fn decode_snapshot(feed: &str, payload: &str) -> Result<Snapshot, FeedError> {
    let parsed: SnapshotPayload = serde_json::from_str(payload).map_err(|e| FeedError::Decode {
        feed: feed.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Snapshot::new(feed, parsed.documents))
}
