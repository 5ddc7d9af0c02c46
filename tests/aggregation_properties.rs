//! Aggregation engine integration tests
//!
//! Drives the subscription manager and aggregator through the in-memory
//! feed backend, plus a hand-driven backend for delivery timing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use ara_dashboard_service::aggregation::{
    default_descriptors, AggregationRule, ClassifyingRule, Counter, FeedDescriptor,
    PartialStatistics, Statistics, StatsAggregator, STATUS_APPROVED, STATUS_PENDING,
    STATUS_REJECTED,
};
use ara_dashboard_service::config::FeedSettings;
use ara_dashboard_service::feed::{
    ChangeFeedBackend, Document, FeedBackendType, FeedError, FeedEvent, FeedSubscription,
    MemoryFeedBackend, Snapshot, SubscriptionHandle,
};
use ara_dashboard_service::subscription::SubscriptionManager;

const STATUS_FIELD: &str = "verificationStatus";

fn user(id: &str, status: &str) -> Document {
    Document::new(id).with_field(STATUS_FIELD, status)
}

fn docs(prefix: &str, n: usize) -> Vec<Document> {
    (0..n).map(|i| Document::new(format!("{}-{}", prefix, i))).collect()
}

fn scenario_users() -> Vec<Document> {
    vec![
        user("u1", STATUS_PENDING),
        user("u2", STATUS_PENDING),
        user("u3", STATUS_APPROVED),
    ]
}

/// Load the initial-load scenario into a memory backend
fn seed_initial_load(backend: &MemoryFeedBackend) {
    backend.replace("users", scenario_users());
    backend.replace("profiles", docs("p", 5));
    backend.replace("flags", docs("f", 3));
    backend.replace("comments", docs("c", 10));
}

fn new_manager(backend: Arc<dyn ChangeFeedBackend>) -> SubscriptionManager {
    SubscriptionManager::new(backend, Arc::new(StatsAggregator::new()))
}

/// Wait until the aggregated statistics satisfy `check`
async fn wait_for_stats(aggregator: &StatsAggregator, check: impl FnMut(&Statistics) -> bool) {
    let mut check = check;
    let mut rx = aggregator.subscribe();
    tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|state| check(&state.statistics)),
    )
    .await
    .expect("statistics condition not reached")
    .expect("aggregator dropped");
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// =============================================================================
// Hand-driven backend: the test decides exactly when each event is sent
// =============================================================================

#[derive(Default)]
struct ManualBackend {
    senders: DashMap<String, mpsc::UnboundedSender<FeedEvent>>,
    handles: DashMap<String, SubscriptionHandle>,
    opens: AtomicUsize,
    refused: DashMap<String, FeedError>,
}

impl ManualBackend {
    fn send(&self, feed: &str, documents: Vec<Document>) {
        let sender = self.senders.get(feed).expect("feed not subscribed");
        let _ = sender.send(FeedEvent::Snapshot(Snapshot::new(feed, documents)));
    }

    fn handle(&self, feed: &str) -> SubscriptionHandle {
        self.handles.get(feed).expect("feed not subscribed").clone()
    }
}

#[async_trait]
impl ChangeFeedBackend for ManualBackend {
    fn backend_type(&self) -> FeedBackendType {
        FeedBackendType::Memory
    }

    async fn subscribe(&self, feed: &str) -> Result<FeedSubscription, FeedError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.refused.get(feed) {
            return Err(error.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new(feed);
        self.senders.insert(feed.to_string(), tx);
        self.handles.insert(feed.to_string(), handle.clone());
        Ok(FeedSubscription::from_unbounded(handle, rx))
    }
}

// =============================================================================
// Rule properties
// =============================================================================

#[test]
fn test_reduce_is_pure() {
    let rule = ClassifyingRule::user_verification(STATUS_FIELD);
    let snapshot = Snapshot::new("users", scenario_users());

    let first = rule.reduce(&snapshot);
    let second = rule.reduce(&snapshot);

    assert_eq!(first, second);
    assert_eq!(first.get(Counter::PendingUsers), Some(2));
}

#[test]
fn test_rules_write_disjoint_counters() {
    let descriptors = default_descriptors(&FeedSettings::default());

    for (i, a) in descriptors.iter().enumerate() {
        for b in descriptors.iter().skip(i + 1) {
            for counter in a.rule.owned_counters() {
                assert!(
                    !b.rule.owned_counters().contains(counter),
                    "{} and {} both write {}",
                    a.name,
                    b.name,
                    counter
                );
            }
        }
    }
}

fn permutations(items: Vec<usize>) -> Vec<Vec<usize>> {
    if items.len() <= 1 {
        return vec![items];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.clone();
        let head = rest.remove(i);
        for mut tail in permutations(rest) {
            tail.insert(0, head);
            out.push(tail);
        }
    }
    out
}

#[test]
fn test_merge_order_across_feeds_does_not_matter() {
    let descriptors = default_descriptors(&FeedSettings::default());
    let snapshots = [
        Snapshot::new("users", scenario_users()),
        Snapshot::new("profiles", docs("p", 5)),
        Snapshot::new("flags", docs("f", 3)),
        Snapshot::new("comments", docs("c", 10)),
    ];
    let partials: Vec<PartialStatistics> = descriptors
        .iter()
        .zip(snapshots.iter())
        .map(|(d, s)| d.rule.reduce(s))
        .collect();

    let orders = permutations((0..partials.len()).collect());
    assert_eq!(orders.len(), 24);

    let mut results = orders.iter().map(|order| {
        let aggregator = StatsAggregator::new();
        for &i in order {
            aggregator.merge(&partials[i]);
        }
        aggregator.current()
    });

    let first = results.next().unwrap();
    assert!(results.all(|r| r == first));
}

#[test]
fn test_bucket_completeness() {
    let rule = ClassifyingRule::user_verification(STATUS_FIELD);
    let statuses = [
        STATUS_PENDING,
        STATUS_APPROVED,
        STATUS_REJECTED,
        "banned",
        "",
        "Approved_Username_Assigned",
    ];

    for status in statuses {
        let snapshot = Snapshot::new("users", vec![user("u", status)]);
        let partial = rule.reduce(&snapshot);
        let counted: u64 = partial.iter().map(|(_, v)| v).sum();

        let known = [STATUS_PENDING, STATUS_APPROVED, STATUS_REJECTED].contains(&status);
        assert_eq!(counted, u64::from(known), "status {:?}", status);
    }
}

// =============================================================================
// Engine scenarios
// =============================================================================

#[tokio::test]
async fn test_initial_load() {
    let backend = Arc::new(MemoryFeedBackend::new());
    seed_initial_load(&backend);
    let manager = new_manager(backend.clone());

    manager
        .start(&default_descriptors(&FeedSettings::default()))
        .await
        .unwrap();

    let expected = Statistics {
        pending_users: 2,
        approved_users: 1,
        rejected_users: 0,
        total_profiles: 5,
        total_flags: 3,
        total_comments: 10,
    };
    wait_for_stats(manager.aggregator(), |s| *s == expected).await;
    assert_eq!(manager.aggregator().current().total_users(), 3);
}

#[tokio::test]
async fn test_feed_failure_is_isolated() {
    let backend = Arc::new(MemoryFeedBackend::new());
    seed_initial_load(&backend);
    backend.deny(
        "flags",
        FeedError::PermissionDenied {
            feed: "flags".to_string(),
        },
    );
    let manager = new_manager(backend.clone());

    manager
        .start(&default_descriptors(&FeedSettings::default()))
        .await
        .unwrap();

    wait_for_stats(manager.aggregator(), |s| {
        s.pending_users == 2 && s.total_profiles == 5 && s.total_comments == 10
    })
    .await;
    let registry = manager.health_registry().clone();
    eventually(|| registry.total_errors() >= 1).await;

    let stats = manager.aggregator().current();
    assert_eq!(stats.total_flags, 0);
    assert_eq!(stats.approved_users, 1);
    assert_eq!(registry.total_errors(), 1);
    assert_eq!(registry.get("flags").unwrap().errors, 1);
    assert!(manager.is_running().await);
}

#[tokio::test]
async fn test_failed_open_is_reported_once_and_others_start() {
    let backend = Arc::new(ManualBackend::default());
    backend.refused.insert(
        "flags".to_string(),
        FeedError::Unavailable {
            feed: "flags".to_string(),
            reason: "backend unreachable".to_string(),
        },
    );
    let manager = new_manager(backend.clone());

    let handle = manager
        .start(&default_descriptors(&FeedSettings::default()))
        .await
        .unwrap();

    assert_eq!(handle.subscription_count(), 3);
    assert_eq!(manager.health_registry().total_errors(), 1);

    backend.send("comments", docs("c", 4));
    wait_for_stats(manager.aggregator(), |s| s.total_comments == 4).await;
    assert_eq!(manager.aggregator().current().total_flags, 0);
}

#[tokio::test]
async fn test_unrecognized_status_is_excluded() {
    let backend = Arc::new(MemoryFeedBackend::new());
    seed_initial_load(&backend);
    let mut users = scenario_users();
    users.push(user("u4", "banned"));
    backend.replace("users", users);
    let manager = new_manager(backend.clone());

    manager
        .start(&default_descriptors(&FeedSettings::default()))
        .await
        .unwrap();

    wait_for_stats(manager.aggregator(), |s| s.total_comments == 10).await;
    let stats = manager.aggregator().current();
    assert_eq!(stats.pending_users, 2);
    assert_eq!(stats.approved_users, 1);
    assert_eq!(stats.rejected_users, 0);
    assert_eq!(manager.health_registry().total_errors(), 0);
}

#[tokio::test]
async fn test_snapshots_from_one_feed_merge_in_order() {
    let backend = Arc::new(ManualBackend::default());
    let manager = new_manager(backend.clone());
    manager
        .start(&[FeedDescriptor::counting("flags", Counter::TotalFlags)])
        .await
        .unwrap();

    for n in [1, 4, 2, 7, 3] {
        backend.send("flags", docs("f", n));
    }

    wait_for_stats(manager.aggregator(), |s| s.total_flags == 3).await;
    assert_eq!(
        manager.health_registry().get("flags").unwrap().snapshots,
        5
    );
}

#[tokio::test]
async fn test_error_does_not_end_subscription() {
    let backend = Arc::new(MemoryFeedBackend::new());
    let manager = new_manager(backend.clone());
    manager
        .start(&[FeedDescriptor::counting("comments", Counter::TotalComments)])
        .await
        .unwrap();

    backend.replace("comments", docs("c", 2));
    backend.fail(
        "comments",
        FeedError::Transport {
            feed: "comments".to_string(),
            reason: "stream reset".to_string(),
        },
    );
    backend.replace("comments", docs("c", 6));

    wait_for_stats(manager.aggregator(), |s| s.total_comments == 6).await;
    let health = manager.health_registry().get("comments").unwrap();
    assert_eq!(health.errors, 1);
    assert!(!health.is_stale());
}

#[tokio::test]
async fn test_silent_feed_keeps_defaults() {
    let backend = Arc::new(ManualBackend::default());
    let manager = new_manager(backend.clone());
    manager
        .start(&default_descriptors(&FeedSettings::default()))
        .await
        .unwrap();

    backend.send("profiles", docs("p", 2));
    wait_for_stats(manager.aggregator(), |s| s.total_profiles == 2).await;

    let stats = manager.aggregator().current();
    assert_eq!(stats.pending_users, 0);
    assert_eq!(stats.total_flags, 0);
    assert_eq!(stats.total_comments, 0);
}

// =============================================================================
// Lifecycle properties
// =============================================================================

#[tokio::test]
async fn test_immediate_double_start_opens_each_feed_once() {
    let backend = Arc::new(MemoryFeedBackend::new());
    let manager = new_manager(backend.clone());
    let descriptors = default_descriptors(&FeedSettings::default());

    let (first, second) = tokio::join!(manager.start(&descriptors), manager.start(&descriptors));
    first.unwrap();
    second.unwrap();

    for feed in ["users", "profiles", "flags", "comments"] {
        assert_eq!(backend.open_count(feed), 1, "feed {}", feed);
        assert_eq!(backend.active_subscribers(feed), 1, "feed {}", feed);
    }
}

#[tokio::test]
async fn test_in_flight_snapshot_dropped_after_stop() {
    let backend = Arc::new(ManualBackend::default());
    let manager = new_manager(backend.clone());
    let handle = manager
        .start(&[FeedDescriptor::counting("flags", Counter::TotalFlags)])
        .await
        .unwrap();

    backend.send("flags", docs("f", 1));
    wait_for_stats(manager.aggregator(), |s| s.total_flags == 1).await;

    // Queued but not yet handled by the engine when stop returns
    backend.send("flags", docs("f", 5));
    assert!(handle.stop());
    assert!(backend.handle("flags").is_cancelled());

    handle.join().await;
    tokio::task::yield_now().await;
    assert_eq!(manager.aggregator().current().total_flags, 1);
}

#[tokio::test]
async fn test_cancelled_handle_merge_is_rejected() {
    let aggregator = StatsAggregator::new();
    let handle = SubscriptionHandle::new("comments");
    handle.cancel();

    let applied = aggregator.merge_from(
        &handle,
        &PartialStatistics::new().with(Counter::TotalComments, 3),
    );

    assert!(!applied);
    assert_eq!(aggregator.current().total_comments, 0);
}

#[tokio::test]
async fn test_stop_from_observer_is_final() {
    let backend = Arc::new(MemoryFeedBackend::new());
    let manager = new_manager(backend.clone());
    let handle = manager
        .start(&[FeedDescriptor::counting("profiles", Counter::TotalProfiles)])
        .await
        .unwrap();

    // Observer stops the engine as soon as it sees the first value
    let mut observer = manager.aggregator().subscribe();
    let observer_handle = handle.clone();
    let observer_task = tokio::spawn(async move {
        observer
            .wait_for(|state| state.statistics.total_profiles == 1)
            .await
            .unwrap();
        observer_handle.stop()
    });

    backend.replace("profiles", docs("p", 1));
    assert!(observer_task.await.unwrap());

    backend.replace("profiles", docs("p", 8));
    handle.join().await;

    assert_eq!(manager.aggregator().current().total_profiles, 1);
    assert_eq!(backend.active_subscribers("profiles"), 0);
    assert!(!handle.stop());
}
