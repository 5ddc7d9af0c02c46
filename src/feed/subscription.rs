//! Subscription handle and event stream for a single change feed.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use uuid::Uuid;

use super::types::FeedEvent;

type CancelHook = Box<dyn FnOnce() + Send + 'static>;

struct HandleInner {
    id: Uuid,
    feed: String,
    cancelled: AtomicBool,
    /// Backend resource release, run at most once
    on_cancel: Mutex<Option<CancelHook>>,
}

/// Cancellation token for one feed subscription.
///
/// Cheap to clone; all clones share the same state. `cancel` is idempotent
/// and may be called from inside code that is handling a delivery from the
/// same subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    /// Handle with no backend resources attached
    pub fn new(feed: impl Into<String>) -> Self {
        Self::build(feed.into(), None)
    }

    /// Handle that runs `hook` exactly once, on the first `cancel`
    pub fn with_cancel_hook(feed: impl Into<String>, hook: impl FnOnce() + Send + 'static) -> Self {
        Self::build(feed.into(), Some(Box::new(hook)))
    }

    fn build(feed: String, hook: Option<CancelHook>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                feed,
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(hook),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn feed(&self) -> &str {
        &self.inner.feed
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancel the subscription.
    ///
    /// Returns `true` only for the call that actually performed the
    /// cancellation; later calls are no-ops.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }

        // Take the hook before running it so the lock is not held by the hook.
        let hook = self
            .inner
            .on_cancel
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(hook) = hook {
            hook();
        }

        tracing::debug!(
            feed = %self.inner.feed,
            subscription_id = %self.inner.id,
            "Feed subscription cancelled"
        );
        true
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.inner.id)
            .field("feed", &self.inner.feed)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// An open subscription: the ordered event stream plus its handle.
///
/// Once the handle is cancelled the stream ends, and an event that was
/// already in flight when `cancel` returned is discarded instead of yielded.
pub struct FeedSubscription {
    handle: SubscriptionHandle,
    events: BoxStream<'static, FeedEvent>,
}

impl FeedSubscription {
    pub fn new(
        handle: SubscriptionHandle,
        events: impl Stream<Item = FeedEvent> + Send + 'static,
    ) -> Self {
        Self {
            handle,
            events: events.boxed(),
        }
    }

    /// Subscription fed by a bounded channel
    pub fn from_receiver(handle: SubscriptionHandle, rx: mpsc::Receiver<FeedEvent>) -> Self {
        Self::new(handle, ReceiverStream::new(rx))
    }

    /// Subscription fed by an unbounded channel
    pub fn from_unbounded(handle: SubscriptionHandle, rx: mpsc::UnboundedReceiver<FeedEvent>) -> Self {
        Self::new(handle, UnboundedReceiverStream::new(rx))
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    pub fn feed(&self) -> &str {
        self.handle.feed()
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }
}

impl Stream for FeedSubscription {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FeedEvent>> {
        if self.handle.is_cancelled() {
            return Poll::Ready(None);
        }

        match self.events.poll_next_unpin(cx) {
            Poll::Ready(Some(_)) if self.handle.is_cancelled() => Poll::Ready(None),
            other => other,
        }
    }
}

impl fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
