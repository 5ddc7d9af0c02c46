use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::aggregation::{
    validate_descriptors, DescriptorError, FeedDescriptor, ReadinessPolicy, StatsAggregator,
};
use crate::feed::{ChangeFeedBackend, SubscriptionHandle};
use crate::metrics::FeedMetrics;

use super::engine::{report_feed_error, EngineTask};
use super::health::{FeedHealth, FeedHealthRegistry};

struct StopInner {
    handles: Vec<SubscriptionHandle>,
    aggregator: Arc<StatsAggregator>,
    health: Arc<FeedHealthRegistry>,
    shutdown: broadcast::Sender<()>,
    stopped: AtomicBool,
    task: StdMutex<Option<JoinHandle<()>>>,
}

/// Bulk teardown for one `start`.
///
/// Clones share state; `stop` cancels every subscription exactly once no
/// matter how many clones call it.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

impl StopHandle {
    /// Cancel every subscription and stop the engine task.
    ///
    /// Returns `true` only for the call that performed the teardown. Once it
    /// returns, no further merge from these subscriptions can happen.
    pub fn stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }

        let mut cancelled = 0usize;
        self.inner.aggregator.fenced(|| {
            for handle in &self.inner.handles {
                if handle.cancel() {
                    cancelled += 1;
                }
            }
        });

        FeedMetrics::subscriptions_closed(self.inner.handles.len());
        self.inner.health.unsubscribe_all();
        // No receiver just means the engine already finished
        let _ = self.inner.shutdown.send(());

        tracing::info!(subscriptions = cancelled, "Feed subscriptions stopped");
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Number of subscriptions this handle owns
    pub fn subscription_count(&self) -> usize {
        self.inner.handles.len()
    }

    /// Wait for the engine task to finish. Only the first caller waits.
    pub async fn join(&self) {
        let task = self.inner.task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Aggregation engine task failed");
            }
        }
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("subscriptions", &self.inner.handles.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Opens the configured feeds, wires each through its rule into the
/// aggregator and owns their teardown.
pub struct SubscriptionManager {
    backend: Arc<dyn ChangeFeedBackend>,
    aggregator: Arc<StatsAggregator>,
    readiness: ReadinessPolicy,
    health: Arc<FeedHealthRegistry>,
    /// Current run; held across `start` so concurrent starts serialize
    running: Mutex<Option<StopHandle>>,
}

impl SubscriptionManager {
    pub fn new(backend: Arc<dyn ChangeFeedBackend>, aggregator: Arc<StatsAggregator>) -> Self {
        Self {
            backend,
            aggregator,
            readiness: ReadinessPolicy::default(),
            health: Arc::new(FeedHealthRegistry::new()),
            running: Mutex::new(None),
        }
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn aggregator(&self) -> &Arc<StatsAggregator> {
        &self.aggregator
    }

    pub fn readiness(&self) -> ReadinessPolicy {
        self.readiness
    }

    pub fn feed_health(&self) -> Vec<FeedHealth> {
        self.health.all()
    }

    pub fn health_registry(&self) -> &Arc<FeedHealthRegistry> {
        &self.health
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_stopped())
    }

    /// Open one subscription per descriptor and start merging.
    ///
    /// While a previous run is still active this opens nothing and returns
    /// that run's handle. A feed that fails to open is reported like any
    /// other feed error; the rest are started regardless.
    #[tracing::instrument(skip(self, descriptors), fields(feeds = descriptors.len()))]
    pub async fn start(&self, descriptors: &[FeedDescriptor]) -> Result<StopHandle, DescriptorError> {
        let mut running = self.running.lock().await;
        if let Some(handle) = running.as_ref().filter(|h| !h.is_stopped()) {
            tracing::debug!("Subscriptions already running, start ignored");
            return Ok(handle.clone());
        }

        validate_descriptors(descriptors)?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut engine = EngineTask::new(
            self.aggregator.clone(),
            self.health.clone(),
            self.readiness,
            shutdown_rx,
        );
        let mut handles = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            self.health.register(&descriptor.name);
            engine.expect_feed(&descriptor.name);

            match self.backend.subscribe(&descriptor.name).await {
                Ok(subscription) => {
                    handles.push(subscription.handle().clone());
                    self.health.set_subscribed(&descriptor.name, true);
                    engine.add(subscription, descriptor.rule.clone());
                }
                Err(e) => report_feed_error(&self.health, &e),
            }
        }

        FeedMetrics::subscriptions_opened(handles.len());
        let opened = handles.len();
        let task = tokio::spawn(engine.run());

        let handle = StopHandle {
            inner: Arc::new(StopInner {
                handles,
                aggregator: self.aggregator.clone(),
                health: self.health.clone(),
                shutdown: shutdown_tx,
                stopped: AtomicBool::new(false),
                task: StdMutex::new(Some(task)),
            }),
        };
        *running = Some(handle.clone());

        if self.readiness == ReadinessPolicy::SetupComplete {
            self.aggregator.mark_ready();
        }

        tracing::info!(
            backend = self.backend.backend_type().as_str(),
            opened = opened,
            requested = descriptors.len(),
            "Feed subscriptions started"
        );
        Ok(handle)
    }

    /// Stop the current run, if any. Returns `true` if something was stopped.
    pub async fn stop(&self) -> bool {
        match self.running.lock().await.take() {
            Some(handle) => handle.stop(),
            None => false,
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.running.get_mut().take() {
            handle.stop();
        }
    }
}
