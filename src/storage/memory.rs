//! In-memory store
//!
//! Implements both [`ChannelStore`] and [`ScheduleEventStore`] without any
//! database dependency. Useful for tests and dry runs; it also offers a few
//! hooks for injecting write failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AddOutcome, ChannelStore, ScheduleEventStore, StoreError, StoreResult};
use crate::models::{Channel, ChannelId, EventStatus, ScheduleEvent, TenantId, TimeRange};

type EventTable = HashMap<ChannelId, BTreeMap<u64, ScheduleEvent>>;

/// In-memory channel and schedule store
#[derive(Default)]
pub struct MemoryStore {
    channels: RwLock<BTreeMap<ChannelId, Channel>>,
    events: RwLock<EventTable>,
    failing_writes: AtomicU32,
    add_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with channels
    pub fn with_channels(channels: impl IntoIterator<Item = Channel>) -> Self {
        let store = Self::new();
        for channel in channels {
            store.upsert_channel(channel);
        }
        store
    }

    /// Insert or replace a channel definition
    pub fn upsert_channel(&self, channel: Channel) {
        if let Ok(mut channels) = self.channels.write() {
            channels.insert(channel.id.clone(), channel);
        }
    }

    /// Remove a channel definition (events are kept)
    pub fn remove_channel(&self, id: &ChannelId) {
        if let Ok(mut channels) = self.channels.write() {
            channels.remove(id);
        }
    }

    /// Make the next `count` calls to `add` fail with `Unavailable`
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of `add` calls that reached the store
    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// Every stored event of a channel, in sequence order
    pub fn all_events(&self, channel_id: &ChannelId) -> Vec<ScheduleEvent> {
        self.events
            .read()
            .map(|events| {
                events
                    .get(channel_id)
                    .map(|by_seq| by_seq.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn read_events(&self) -> StoreResult<RwLockReadGuard<'_, EventTable>> {
        self.events
            .read()
            .map_err(|_| StoreError::unavailable("event table lock poisoned"))
    }

    fn write_events(&self) -> StoreResult<RwLockWriteGuard<'_, EventTable>> {
        self.events
            .write()
            .map_err(|_| StoreError::unavailable("event table lock poisoned"))
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn list_all(&self) -> StoreResult<Vec<Channel>> {
        let channels = self
            .channels
            .read()
            .map_err(|_| StoreError::unavailable("channel table lock poisoned"))?;
        Ok(channels.values().cloned().collect())
    }

    async fn list_by_tenant(&self, tenant: &TenantId) -> StoreResult<Vec<Channel>> {
        let channels = self
            .channels
            .read()
            .map_err(|_| StoreError::unavailable("channel table lock poisoned"))?;
        Ok(channels
            .values()
            .filter(|c| &c.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &ChannelId) -> StoreResult<Option<Channel>> {
        let channels = self
            .channels
            .read()
            .map_err(|_| StoreError::unavailable("channel table lock poisoned"))?;
        Ok(channels.get(id).cloned())
    }
}

#[async_trait]
impl ScheduleEventStore for MemoryStore {
    async fn events_by_channel(
        &self,
        channel_id: &ChannelId,
        range: TimeRange,
        include_expired: bool,
    ) -> StoreResult<Vec<ScheduleEvent>> {
        let events = self.read_events()?;
        Ok(events
            .get(channel_id)
            .map(|by_seq| {
                by_seq
                    .values()
                    .filter(|e| e.overlaps(&range))
                    .filter(|e| include_expired || e.status == EventStatus::Planned)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn tail(&self, channel_id: &ChannelId) -> StoreResult<Option<ScheduleEvent>> {
        let events = self.read_events()?;
        Ok(events
            .get(channel_id)
            .and_then(|by_seq| by_seq.values().next_back().cloned()))
    }

    async fn add(&self, batch: &[ScheduleEvent]) -> StoreResult<AddOutcome> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            return Err(StoreError::unavailable("injected write failure"));
        }

        let mut events = self.write_events()?;

        // Validate the whole batch first so a conflict leaves nothing behind
        let mut outcome = AddOutcome::default();
        for event in batch {
            let existing = events
                .get(&event.channel_id)
                .and_then(|by_seq| by_seq.get(&event.sequence));
            match existing {
                Some(stored) if stored.same_placement(event) => outcome.unchanged += 1,
                Some(_) => {
                    return Err(StoreError::Conflict {
                        channel_id: event.channel_id.clone(),
                        sequence: event.sequence,
                    })
                }
                None => outcome.inserted += 1,
            }
        }

        for event in batch {
            events
                .entry(event.channel_id.clone())
                .or_default()
                .entry(event.sequence)
                .or_insert_with(|| event.clone());
        }

        Ok(outcome)
    }

    async fn mark_expired(
        &self,
        channel_id: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut events = self.write_events()?;
        let mut expired = 0;
        if let Some(by_seq) = events.get_mut(channel_id) {
            for event in by_seq.values_mut() {
                if event.status == EventStatus::Planned && event.end < before {
                    event.status = EventStatus::Expired;
                    expired += 1;
                }
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn event(seq: u64, start_min: i64, len_min: i64, guid: &str) -> ScheduleEvent {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        ScheduleEvent {
            channel_id: ChannelId::from("news"),
            sequence: seq,
            start: base + Duration::minutes(start_min),
            end: base + Duration::minutes(start_min + len_min),
            item_guid: guid.to_string(),
            title: guid.to_string(),
            loop_pass: 0,
            status: EventStatus::Planned,
        }
    }

    #[tokio::test]
    async fn test_add_is_write_once() {
        let store = MemoryStore::new();
        let batch = vec![event(1, 0, 30, "a"), event(2, 30, 45, "b")];

        let first = store.add(&batch).await.unwrap();
        assert_eq!(first.inserted, 2);

        let retry = store.add(&batch).await.unwrap();
        assert_eq!(retry.inserted, 0);
        assert_eq!(retry.unchanged, 2);
        assert_eq!(store.all_events(&ChannelId::from("news")).len(), 2);
    }

    #[tokio::test]
    async fn test_conflict_rejects_whole_batch() {
        let store = MemoryStore::new();
        store.add(&[event(1, 0, 30, "a")]).await.unwrap();

        let result = store
            .add(&[event(2, 30, 30, "b"), event(1, 0, 30, "other")])
            .await;
        assert!(matches!(result, Err(StoreError::Conflict { sequence: 1, .. })));
        assert_eq!(store.all_events(&ChannelId::from("news")).len(), 1);
    }

    #[tokio::test]
    async fn test_tail_is_highest_sequence() {
        let store = MemoryStore::new();
        store
            .add(&[event(1, 0, 30, "a"), event(2, 30, 45, "b")])
            .await
            .unwrap();

        let tail = store.tail(&ChannelId::from("news")).await.unwrap().unwrap();
        assert_eq!(tail.sequence, 2);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_writes(1);

        assert!(store.add(&[event(1, 0, 30, "a")]).await.is_err());
        assert!(store.add(&[event(1, 0, 30, "a")]).await.is_ok());
        assert_eq!(store.add_calls(), 2);
    }

    #[tokio::test]
    async fn test_mark_expired_hides_from_default_queries() {
        let store = MemoryStore::new();
        let id = ChannelId::from("news");
        store
            .add(&[event(1, 0, 30, "a"), event(2, 30, 45, "b")])
            .await
            .unwrap();

        let cutoff = Utc.with_ymd_and_hms(2024, 3, 1, 0, 40, 0).unwrap();
        assert_eq!(store.mark_expired(&id, cutoff).await.unwrap(), 1);

        let day = TimeRange::for_date(cutoff.date_naive());
        let planned = store.events_by_channel(&id, day, false).await.unwrap();
        assert_eq!(planned.len(), 1);

        let all = store.events_by_channel(&id, day, true).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
