//! Snapshot, document and event types delivered by change feeds.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A single record in a feed collection.
///
/// Apart from `id`, fields are opaque to the feed layer; aggregation rules
/// decide which of them matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default, flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Field value if present and a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Complete current contents of a feed (never a diff).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub feed: String,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl Snapshot {
    pub fn new(feed: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            feed: feed.into(),
            documents,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }
}

/// One delivery on a feed subscription.
///
/// Snapshots and errors share a single ordered stream so that the order in
/// which the backend reports them is preserved.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Snapshot(Snapshot),
    Error(FeedError),
}

/// Failure reported by a change feed (a FeedSubscriptionError).
///
/// Never fatal: the engine logs it and keeps the remaining feeds running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("Feed '{feed}' is unavailable: {reason}")]
    Unavailable { feed: String, reason: String },

    #[error("Permission denied for feed '{feed}'")]
    PermissionDenied { feed: String },

    #[error("Transport failure on feed '{feed}': {reason}")]
    Transport { feed: String, reason: String },

    #[error("Malformed snapshot on feed '{feed}': {reason}")]
    Decode { feed: String, reason: String },
}

impl FeedError {
    /// Name of the feed the error belongs to
    pub fn feed(&self) -> &str {
        match self {
            Self::Unavailable { feed, .. }
            | Self::PermissionDenied { feed }
            | Self::Transport { feed, .. }
            | Self::Decode { feed, .. } => feed,
        }
    }

    /// Short machine-readable kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Transport { .. } => "transport",
            Self::Decode { .. } => "decode",
        }
    }
}
