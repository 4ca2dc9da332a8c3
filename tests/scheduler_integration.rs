//! Integration tests for the auto-scheduler
//!
//! These tests drive the orchestrator against the in-memory store and a
//! static feed source with fixed clock values:
//! - Gap-free horizon coverage and looping
//! - Idempotent re-runs and crash recovery from the persisted tail
//! - Starved / Failed lifecycle and operator reset
//! - Reentrancy guard under concurrent ticks
//! - Retention trimming

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Semaphore;

use onair::config::SchedulerConfig;
use onair::feed::{FeedError, FeedSource, StaticFeedSource};
use onair::models::{Channel, ChannelId, EventStatus, RawFeedItem, ScheduleEvent, TenantId, TimeRange};
use onair::query::{channel_schedule, ScheduleWindow};
use onair::scheduler::{ChannelState, Orchestrator, SchedulerError};
use onair::storage::{
    AddOutcome, ChannelStore, MemoryStore, ScheduleEventStore, StoreError, StoreResult,
};

// ============================================================================
// Fixtures
// ============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

fn config() -> SchedulerConfig {
    SchedulerConfig {
        horizon_secs: 2 * 3600,
        retention_secs: 3600,
        trim_interval_secs: 300,
        worker_pool_size: 4,
        starved_backoff_base_secs: 60,
        starved_backoff_max_secs: 900,
        write_max_retries: 1,
        write_retry_base_ms: 1,
        shutdown_grace_secs: 1,
        tick_interval_secs: 1,
        ..Default::default()
    }
}

fn channel(id: &str) -> Channel {
    Channel::new(id, "acme", format!("Channel {id}"))
        .with_feed(format!("https://feeds.example.com/{id}.json"))
}

fn looping_items() -> Vec<RawFeedItem> {
    vec![
        RawFeedItem::new("ep-30", 30 * 60).with_title("Thirty"),
        RawFeedItem::new("ep-45", 45 * 60).with_title("Forty-five"),
    ]
}

struct Harness {
    store: Arc<MemoryStore>,
    feeds: Arc<StaticFeedSource>,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new(channels: &[&str]) -> Self {
        let store = Arc::new(MemoryStore::with_channels(
            channels.iter().map(|id| channel(id)),
        ));
        let feeds = Arc::new(StaticFeedSource::new());
        for id in channels {
            feeds.set_items(&ChannelId::from(*id), looping_items());
        }
        let orchestrator = Orchestrator::new(config(), store.clone(), feeds.clone(), store.clone());
        Self {
            store,
            feeds,
            orchestrator,
        }
    }

    /// Fresh orchestrator over the same store, as after a restart
    fn restart(&self) -> Orchestrator {
        Orchestrator::new(config(), self.store.clone(), self.feeds.clone(), self.store.clone())
    }

    async fn tick(&self, at: DateTime<Utc>) {
        self.orchestrator.tick_at(at).await.unwrap();
        self.orchestrator.wait_idle().await;
    }

    async fn state(&self, id: &str) -> ChannelState {
        self.orchestrator
            .status(&ChannelId::from(id))
            .await
            .map(|s| s.state)
            .unwrap()
    }
}

fn assert_gap_free(events: &[ScheduleEvent]) {
    for pair in events.windows(2) {
        assert_eq!(pair[0].end, pair[1].start, "gap or overlap at {}", pair[1].sequence);
        assert_eq!(pair[0].sequence + 1, pair[1].sequence);
    }
}

fn minutes(events: &[ScheduleEvent]) -> Vec<(i64, i64)> {
    events
        .iter()
        .map(|e| ((e.start - t0()).num_minutes(), (e.end - t0()).num_minutes()))
        .collect()
}

// ============================================================================
// Coverage and looping
// ============================================================================

#[tokio::test]
async fn test_looping_feed_fills_horizon() {
    let h = Harness::new(&["news"]);
    h.tick(t0()).await;

    let events = h.store.all_events(&ChannelId::from("news"));
    assert_eq!(minutes(&events), vec![(0, 30), (30, 75), (75, 105), (105, 150)]);

    let keys: Vec<_> = events
        .iter()
        .map(|e| (e.sequence, e.item_guid.as_str(), e.loop_pass))
        .collect();
    assert_eq!(
        keys,
        vec![(1, "ep-30", 0), (2, "ep-45", 0), (3, "ep-30", 1), (4, "ep-45", 1)]
    );
    assert_eq!(h.state("news").await, ChannelState::Idle);
}

#[tokio::test]
async fn test_horizon_advance_continues_timeline() {
    let h = Harness::new(&["news"]);
    h.tick(t0()).await;
    h.tick(t0() + Duration::hours(1)).await;

    let events = h.store.all_events(&ChannelId::from("news"));
    assert_gap_free(&events);
    assert_eq!(events[0].start, t0());
    assert!(events.last().unwrap().end >= t0() + Duration::hours(3));

    // Fifth event continues the loop rather than restarting it
    assert_eq!(events[4].item_guid, "ep-30");
    assert_eq!(events[4].loop_pass, 2);
}

#[tokio::test]
async fn test_channels_are_independent() {
    let h = Harness::new(&["news", "sports"]);
    h.feeds.set_items(&ChannelId::from("sports"), Vec::new());
    h.tick(t0()).await;

    assert_eq!(h.store.all_events(&ChannelId::from("news")).len(), 4);
    assert_eq!(h.state("news").await, ChannelState::Idle);
    assert_eq!(h.state("sports").await, ChannelState::Starved);
}

// ============================================================================
// Idempotency and recovery
// ============================================================================

#[tokio::test]
async fn test_rerun_at_same_instant_writes_nothing() {
    let h = Harness::new(&["news"]);
    h.tick(t0()).await;
    assert_eq!(h.store.add_calls(), 1);

    h.tick(t0()).await;
    h.tick(t0() + Duration::minutes(10)).await;
    assert_eq!(h.store.add_calls(), 1);
    assert_eq!(h.store.all_events(&ChannelId::from("news")).len(), 4);
}

#[tokio::test]
async fn test_restart_rederives_cursor_from_tail() {
    let h = Harness::new(&["news"]);
    h.tick(t0()).await;
    let before = h.store.all_events(&ChannelId::from("news"));

    // New process: no in-memory cursor
    let restarted = h.restart();
    restarted.tick_at(t0() + Duration::hours(1)).await.unwrap();
    restarted.wait_idle().await;

    let after = h.store.all_events(&ChannelId::from("news"));
    assert_eq!(&after[..before.len()], &before[..]);
    assert_gap_free(&after);
    assert_eq!(after[before.len()].sequence, 5);

    let status = restarted.status(&ChannelId::from("news")).await.unwrap();
    assert_eq!(status.state, ChannelState::Idle);
    assert_eq!(status.last_sequence, after.last().unwrap().sequence);
}

#[tokio::test]
async fn test_stale_timeline_restarts_at_now() {
    let h = Harness::new(&["news"]);
    h.tick(t0()).await;

    let later = t0() + Duration::hours(6);
    h.tick(later).await;

    let events = h.store.all_events(&ChannelId::from("news"));
    assert_eq!(events[4].start, later);
    assert_eq!(events[4].sequence, 5);
}

#[tokio::test]
async fn test_churned_guid_restarts_feed_on_next_pass() {
    let h = Harness::new(&["news"]);
    h.tick(t0()).await;

    h.feeds.set_items(
        &ChannelId::from("news"),
        vec![RawFeedItem::new("fresh-1", 20 * 60), RawFeedItem::new("fresh-2", 20 * 60)],
    );
    h.tick(t0() + Duration::hours(1)).await;

    let events = h.store.all_events(&ChannelId::from("news"));
    assert_gap_free(&events);
    assert_eq!(events[4].item_guid, "fresh-1");
    assert_eq!(events[4].loop_pass, 2);
}

// ============================================================================
// Starved lifecycle
// ============================================================================

#[tokio::test]
async fn test_empty_feed_starves_without_writes() {
    let h = Harness::new(&["news"]);
    h.feeds.set_items(&ChannelId::from("news"), Vec::new());
    h.tick(t0()).await;

    assert_eq!(h.state("news").await, ChannelState::Starved);
    assert_eq!(h.store.add_calls(), 0);

    let status = h.orchestrator.status(&ChannelId::from("news")).await.unwrap();
    assert_eq!(status.consecutive_starvations, 1);
    assert_eq!(status.next_attempt_at, Some(t0() + Duration::seconds(60)));
}

#[tokio::test]
async fn test_starved_channel_backs_off_then_recovers() {
    let h = Harness::new(&["news"]);
    let id = ChannelId::from("news");
    h.feeds.set_unavailable(&id, "connection refused");
    h.tick(t0()).await;
    assert_eq!(h.state("news").await, ChannelState::Starved);

    // Feed is back, but the backoff has not elapsed
    h.feeds.set_items(&id, looping_items());
    let summary = h.orchestrator.tick_at(t0() + Duration::seconds(30)).await.unwrap();
    assert!(summary.dispatched.is_empty());

    let summary = h.orchestrator.tick_at(t0() + Duration::seconds(60)).await.unwrap();
    assert_eq!(summary.dispatched, vec![id.clone()]);
    h.orchestrator.wait_idle().await;

    assert_eq!(h.state("news").await, ChannelState::Idle);
    let events = h.store.all_events(&id);
    assert_eq!(events[0].start, t0() + Duration::seconds(60));
}

#[tokio::test]
async fn test_absurd_duration_starves_and_backs_off() {
    let h = Harness::new(&["news"]);
    let id = ChannelId::from("news");
    h.feeds.set_items(&id, vec![RawFeedItem::new("forever", 10_000_000_000_000)]);

    h.tick(t0()).await;
    let status = h.orchestrator.status(&id).await.unwrap();
    assert_eq!(status.state, ChannelState::Starved);
    assert_eq!(status.consecutive_starvations, 1);
    assert_eq!(h.store.add_calls(), 0);

    let summary = h.orchestrator.tick_at(t0() + Duration::seconds(30)).await.unwrap();
    assert!(summary.dispatched.is_empty());

    h.tick(t0() + Duration::seconds(60)).await;
    let status = h.orchestrator.status(&id).await.unwrap();
    assert_eq!(status.state, ChannelState::Starved);
    assert_eq!(status.consecutive_starvations, 2);
    assert_eq!(
        status.next_attempt_at,
        Some(t0() + Duration::seconds(60) + Duration::seconds(120))
    );
}

#[tokio::test]
async fn test_starvation_leaves_schedule_untouched() {
    let h = Harness::new(&["news"]);
    let id = ChannelId::from("news");
    h.tick(t0()).await;
    let before = h.store.all_events(&id);

    h.feeds.set_unavailable(&id, "timeout");
    h.tick(t0() + Duration::hours(1)).await;

    assert_eq!(h.state("news").await, ChannelState::Starved);
    assert_eq!(h.store.all_events(&id), before);
}

// ============================================================================
// Failed lifecycle
// ============================================================================

#[tokio::test]
async fn test_persistence_failure_needs_reset() {
    let h = Harness::new(&["news"]);
    let id = ChannelId::from("news");
    h.store.fail_next_writes(100);
    h.tick(t0()).await;

    assert_eq!(h.state("news").await, ChannelState::Failed);
    let status = h.orchestrator.status(&id).await.unwrap();
    assert!(status.last_error.unwrap().contains("injected"));

    // Excluded from ticks until reset
    h.store.fail_next_writes(0);
    let summary = h.orchestrator.tick_at(t0() + Duration::hours(1)).await.unwrap();
    assert!(summary.dispatched.is_empty());

    assert_eq!(h.orchestrator.reset_channel(&id).await, Some(ChannelState::Failed));
    h.tick(t0() + Duration::hours(1)).await;
    assert_eq!(h.state("news").await, ChannelState::Idle);
    assert!(!h.store.all_events(&id).is_empty());
}

#[tokio::test]
async fn test_reset_unknown_channel() {
    let h = Harness::new(&["news"]);
    h.tick(t0()).await;
    assert_eq!(h.orchestrator.reset_channel(&ChannelId::from("nope")).await, None);
    assert_eq!(
        h.orchestrator.reset_channel(&ChannelId::from("news")).await,
        Some(ChannelState::Idle)
    );
}

// ============================================================================
// Concurrency
// ============================================================================

/// Event store where another writer claims the next sequence just before our
/// first batch lands
struct RacingStore {
    inner: Arc<MemoryStore>,
    raced: AtomicBool,
}

#[async_trait]
impl ScheduleEventStore for RacingStore {
    async fn events_by_channel(
        &self,
        channel_id: &ChannelId,
        range: TimeRange,
        include_expired: bool,
    ) -> StoreResult<Vec<ScheduleEvent>> {
        self.inner
            .events_by_channel(channel_id, range, include_expired)
            .await
    }

    async fn tail(&self, channel_id: &ChannelId) -> StoreResult<Option<ScheduleEvent>> {
        self.inner.tail(channel_id).await
    }

    async fn add(&self, events: &[ScheduleEvent]) -> StoreResult<AddOutcome> {
        if let Some(first) = events.first() {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let foreign = ScheduleEvent {
                    item_guid: "foreign".to_string(),
                    title: "Foreign".to_string(),
                    end: first.start + Duration::minutes(10),
                    loop_pass: 0,
                    ..first.clone()
                };
                self.inner.add(&[foreign]).await?;
            }
        }
        self.inner.add(events).await
    }

    async fn mark_expired(
        &self,
        channel_id: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.inner.mark_expired(channel_id, before).await
    }
}

#[tokio::test]
async fn test_single_write_conflict_is_replanned() {
    let store = Arc::new(MemoryStore::with_channels([channel("news")]));
    let events = Arc::new(RacingStore {
        inner: store.clone(),
        raced: AtomicBool::new(false),
    });
    let feeds = Arc::new(StaticFeedSource::new());
    feeds.set_items(&ChannelId::from("news"), looping_items());
    let orchestrator = Orchestrator::new(config(), store.clone(), feeds, events);

    orchestrator.tick_at(t0()).await.unwrap();
    orchestrator.wait_idle().await;

    let status = orchestrator.status(&ChannelId::from("news")).await.unwrap();
    assert_eq!(status.state, ChannelState::Idle);
    assert!(status.last_error.is_none());

    let events = store.all_events(&ChannelId::from("news"));
    assert_gap_free(&events);
    assert_eq!(events[0].item_guid, "foreign");
    assert_eq!(minutes(&events[..2]), vec![(0, 10), (10, 40)]);
    assert_eq!(events[1].sequence, 2);
    assert_eq!(events[1].item_guid, "ep-30");
    assert!(events.last().unwrap().end >= t0() + Duration::hours(2));
    assert_eq!(status.last_sequence, events.last().unwrap().sequence);
}

/// Feed source that blocks until the test releases it
struct GatedFeed {
    inner: StaticFeedSource,
    gate: Semaphore,
}

#[async_trait]
impl FeedSource for GatedFeed {
    async fn fetch_items(&self, channel: &Channel) -> Result<Vec<RawFeedItem>, FeedError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| FeedError::unavailable("gate", e.to_string()))?;
        self.inner.fetch_items(channel).await
    }
}

#[tokio::test]
async fn test_running_channel_is_skipped_by_concurrent_tick() {
    let store = Arc::new(MemoryStore::with_channels([channel("news")]));
    let feeds = Arc::new(GatedFeed {
        inner: StaticFeedSource::new(),
        gate: Semaphore::new(0),
    });
    feeds.inner.set_items(&ChannelId::from("news"), looping_items());
    let orchestrator = Orchestrator::new(config(), store.clone(), feeds.clone(), store.clone());

    let first = orchestrator.tick_at(t0()).await.unwrap();
    assert_eq!(first.dispatched, vec![ChannelId::from("news")]);

    let second = orchestrator.tick_at(t0()).await.unwrap();
    assert!(second.dispatched.is_empty());
    assert_eq!(second.skipped_running, vec![ChannelId::from("news")]);
    assert_eq!(
        orchestrator.status(&ChannelId::from("news")).await.unwrap().state,
        ChannelState::Running
    );

    feeds.gate.add_permits(10);
    orchestrator.wait_idle().await;

    let events = store.all_events(&ChannelId::from("news"));
    assert_eq!(events.len(), 4);
    assert_gap_free(&events);
    assert_eq!(store.add_calls(), 1);
}

#[tokio::test]
async fn test_many_channels_share_worker_pool() {
    let ids: Vec<String> = (0..12).map(|i| format!("ch-{i:02}")).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let h = Harness::new(&refs);

    let summary = h.orchestrator.tick_at(t0()).await.unwrap();
    assert_eq!(summary.dispatched.len(), 12);
    assert_eq!(summary.registered, 12);
    h.orchestrator.wait_idle().await;

    for id in &ids {
        let events = h.store.all_events(&ChannelId::new(id.clone()));
        assert_eq!(events.len(), 4);
    }
}

// ============================================================================
// Channel set changes
// ============================================================================

#[tokio::test]
async fn test_removed_channel_is_forgotten() {
    let h = Harness::new(&["news", "sports"]);
    h.tick(t0()).await;

    h.store.remove_channel(&ChannelId::from("sports"));
    let summary = h.orchestrator.tick_at(t0() + Duration::minutes(1)).await.unwrap();
    assert_eq!(summary.forgotten, 1);

    let statuses = h.orchestrator.statuses().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].channel_id, ChannelId::from("news"));
}

#[tokio::test]
async fn test_new_channel_is_picked_up() {
    let h = Harness::new(&["news"]);
    h.tick(t0()).await;

    h.store.upsert_channel(channel("late"));
    h.feeds.set_items(&ChannelId::from("late"), looping_items());
    let summary = h.orchestrator.tick_at(t0() + Duration::minutes(5)).await.unwrap();
    assert_eq!(summary.registered, 1);
    h.orchestrator.wait_idle().await;

    let events = h.store.all_events(&ChannelId::from("late"));
    assert_eq!(events[0].start, t0() + Duration::minutes(5));
}

/// Channel store that is always down
struct DownChannelStore;

#[async_trait]
impl ChannelStore for DownChannelStore {
    async fn list_all(&self) -> StoreResult<Vec<Channel>> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn list_by_tenant(&self, _tenant: &TenantId) -> StoreResult<Vec<Channel>> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn get(&self, _id: &ChannelId) -> StoreResult<Option<Channel>> {
        Err(StoreError::unavailable("connection refused"))
    }
}

#[tokio::test]
async fn test_channel_enumeration_failure_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        config(),
        Arc::new(DownChannelStore),
        Arc::new(StaticFeedSource::new()),
        store,
    );

    let err = orchestrator.tick_at(t0()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::ChannelEnumeration { .. }));

    let result = orchestrator.run(std::future::pending::<()>()).await;
    assert!(matches!(result, Err(SchedulerError::ChannelEnumeration { .. })));
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let h = Harness::new(&["news"]);
    let shutdown = tokio::time::sleep(std::time::Duration::from_millis(200));

    h.orchestrator.run(shutdown).await.unwrap();

    // Bootstrap ran against the real clock
    let events = h.store.all_events(&ChannelId::from("news"));
    assert!(!events.is_empty());
    assert_gap_free(&events);
    assert_eq!(h.state("news").await, ChannelState::Idle);
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn test_trim_expires_but_history_stays_queryable() {
    let h = Harness::new(&["news"]);
    let id = ChannelId::from("news");
    h.tick(t0()).await;

    // Retention 1h: at +2h the boundary is +1h, so only [0, 30) expires
    h.tick(t0() + Duration::hours(2)).await;

    let events = h.store.all_events(&id);
    assert_eq!(events[0].status, EventStatus::Expired);
    assert_eq!(events[1].status, EventStatus::Planned);

    let first_hour = TimeRange::new(t0(), t0() + Duration::hours(1));
    let planned = h.store.events_by_channel(&id, first_hour, false).await.unwrap();
    assert_eq!(planned.len(), 1);

    let history = channel_schedule(
        h.store.as_ref(),
        h.store.as_ref(),
        &id,
        ScheduleWindow::Range(first_hour),
        t0() + Duration::hours(2),
        Duration::hours(2),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(history.events.len(), 2);
    assert_eq!(history.events[0].status, EventStatus::Expired);
}

#[tokio::test]
async fn test_trim_is_throttled() {
    let h = Harness::new(&["news"]);
    let id = ChannelId::from("news");
    h.tick(t0()).await;

    // Boundary +29m: nothing has ended yet
    h.tick(t0() + Duration::minutes(89)).await;
    assert_eq!(h.store.all_events(&id)[0].status, EventStatus::Planned);

    // Three minutes after the last trim: not due even though [0, 30) is past the boundary
    h.tick(t0() + Duration::minutes(92)).await;
    assert_eq!(h.store.all_events(&id)[0].status, EventStatus::Planned);

    h.tick(t0() + Duration::minutes(95)).await;
    assert_eq!(h.store.all_events(&id)[0].status, EventStatus::Expired);
}
