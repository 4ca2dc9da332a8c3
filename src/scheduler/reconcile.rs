//! Channel reconciliation
//!
//! One reconciliation pass brings a channel's persisted timeline up to its
//! horizon:
//!
//! 1. Plan against the in-memory cursor; a covered horizon costs no I/O
//! 2. Re-derive the cursor from the persisted tail (the tail always wins)
//! 3. Fetch and normalize the feed
//! 4. Place items and commit them as one idempotent batch
//! 5. On a write conflict, re-read the tail, re-plan and retry once
//!
//! Bootstrap and steady-state ticks share this path; bootstrap only skips
//! step 1.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::error::{SchedulerError, SchedulerResult};
use super::horizon::{HorizonMaintainer, HorizonPlan};
use super::placement::{place, Placement};
use super::state::SchedulerCursor;
use crate::feed::{normalize, FeedSource, NormalizedFeed};
use crate::models::{Channel, ChannelId};
use crate::storage::{AddOutcome, ScheduleEventStore, StoreError, StoreResult};
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Result of one successful reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub channel_id: ChannelId,
    /// Cursor after the pass, matching the persisted tail
    pub cursor: SchedulerCursor,
    pub inserted: usize,
    pub unchanged: usize,
    /// Whether the feed was fetched during this pass
    pub fetched: bool,
    /// The in-memory cursor disagreed with the persisted tail
    pub recovered: bool,
    pub dropped: usize,
    pub deferred: usize,
}

impl ReconcileReport {
    fn skipped(channel_id: &ChannelId, cursor: SchedulerCursor) -> Self {
        Self {
            channel_id: channel_id.clone(),
            cursor,
            inserted: 0,
            unchanged: 0,
            fetched: false,
            recovered: false,
            dropped: 0,
            deferred: 0,
        }
    }

    /// Whether the pass wrote anything
    pub fn wrote(&self) -> bool {
        self.inserted > 0
    }
}

/// Brings channel timelines up to their horizon
pub struct Reconciler {
    feeds: Arc<dyn FeedSource>,
    events: Arc<dyn ScheduleEventStore>,
    horizon: HorizonMaintainer,
    write_retry: RetryConfig,
}

impl Reconciler {
    pub fn new(
        feeds: Arc<dyn FeedSource>,
        events: Arc<dyn ScheduleEventStore>,
        horizon: HorizonMaintainer,
        write_retry: RetryConfig,
    ) -> Self {
        Self {
            feeds,
            events,
            horizon,
            write_retry,
        }
    }

    pub fn horizon(&self) -> &HorizonMaintainer {
        &self.horizon
    }

    /// Run one pass for `channel` at `now`
    ///
    /// With `force` unset, a cursor that already covers the horizon returns
    /// immediately without touching the feed or the store.
    ///
    /// # Errors
    ///
    /// - `FeedUnavailable` / `EmptyFeed` when there is nothing to place
    /// - `Persistence` when the store fails after retries or a write
    ///   conflict survives one re-reconciliation
    pub async fn reconcile(
        &self,
        channel: &Channel,
        cursor: &SchedulerCursor,
        now: DateTime<Utc>,
        force: bool,
    ) -> SchedulerResult<ReconcileReport> {
        let horizon = channel.horizon_or(self.horizon.default_horizon());

        if !force && !self.horizon.plan(now, cursor, horizon).needs_fill() {
            debug!(channel_id = %channel.id, "Horizon covered, nothing to do");
            return Ok(ReconcileReport::skipped(&channel.id, cursor.clone()));
        }

        let mut persisted = self.persisted_cursor(&channel.id).await?;
        persisted.feed_revision = cursor.feed_revision.clone();
        let recovered = !persisted.same_tail(cursor);
        if recovered && !force {
            warn!(
                channel_id = %channel.id,
                memory_sequence = cursor.last_sequence,
                persisted_sequence = persisted.last_sequence,
                "Cursor disagrees with persisted tail, re-deriving"
            );
        }

        let plan = self.horizon.plan(now, &persisted, horizon);
        if !plan.needs_fill() {
            persisted.last_run_at = Some(now);
            let mut report = ReconcileReport::skipped(&channel.id, persisted);
            report.recovered = recovered;
            return Ok(report);
        }

        let feed = self.fetch_feed(channel, now).await?;
        if feed.is_empty() {
            return Err(SchedulerError::empty_feed(&channel.id));
        }

        if persisted.feed_revision.as_deref() != Some(feed.revision()) {
            if let Some(previous) = &persisted.feed_revision {
                info!(
                    channel_id = %channel.id,
                    previous = %previous,
                    revision = %feed.revision(),
                    "Feed content changed"
                );
            }
            persisted.feed_revision = Some(feed.revision().to_string());
        }

        let (mut cursor, outcome) = self.commit(channel, persisted, plan, &feed).await?;
        cursor.last_run_at = Some(now);

        info!(
            channel_id = %channel.id,
            inserted = outcome.inserted,
            unchanged = outcome.unchanged,
            last_sequence = cursor.last_sequence,
            "Channel reconciled"
        );

        Ok(ReconcileReport {
            channel_id: channel.id.clone(),
            cursor,
            inserted: outcome.inserted,
            unchanged: outcome.unchanged,
            fetched: true,
            recovered,
            dropped: feed.dropped.len(),
            deferred: feed.deferred.len(),
        })
    }

    /// Mark events that ended before the retention boundary as Expired
    pub async fn trim(&self, channel_id: &ChannelId, now: DateTime<Utc>) -> StoreResult<usize> {
        let boundary = self.horizon.trim_boundary(now);
        let expired = self.events.mark_expired(channel_id, boundary).await?;
        if expired > 0 {
            debug!(channel_id = %channel_id, expired, before = %boundary, "Expired past events");
        }
        Ok(expired)
    }

    /// Place and write, re-planning once on a write conflict
    async fn commit(
        &self,
        channel: &Channel,
        mut cursor: SchedulerCursor,
        mut plan: HorizonPlan,
        feed: &NormalizedFeed,
    ) -> SchedulerResult<(SchedulerCursor, AddOutcome)> {
        let mut conflicted = false;

        loop {
            let Some(fill_from) = plan.fill_from() else {
                return Ok((cursor, AddOutcome::default()));
            };

            let start = cursor.placement_start(fill_from, feed);
            let placement = place(&channel.id, start, feed, plan.target_end)?;

            match self.write(&placement).await {
                Ok(outcome) => {
                    cursor.advance(&placement);
                    return Ok((cursor, outcome));
                }
                Err(StoreError::Conflict { sequence, .. }) if !conflicted => {
                    warn!(
                        channel_id = %channel.id,
                        sequence,
                        "Write conflict, re-reading persisted state"
                    );
                    conflicted = true;

                    let revision = cursor.feed_revision.take();
                    cursor = self.persisted_cursor(&channel.id).await?;
                    cursor.feed_revision = revision;
                    plan = self.horizon.plan(
                        plan.now,
                        &cursor,
                        plan.target_end - plan.now,
                    );
                }
                Err(StoreError::Conflict { sequence, .. }) => {
                    return Err(SchedulerError::persistence(
                        &channel.id,
                        format!("write conflict at sequence {sequence} persisted after re-reconcile"),
                    ));
                }
                Err(e) => return Err(SchedulerError::from_store(&channel.id, e)),
            }
        }
    }

    async fn write(&self, placement: &Placement) -> StoreResult<AddOutcome> {
        with_retry_if(
            &self.write_retry,
            || self.events.add(&placement.events),
            StoreError::is_retryable,
        )
        .await
    }

    async fn persisted_cursor(&self, channel_id: &ChannelId) -> SchedulerResult<SchedulerCursor> {
        let tail = with_retry_if(
            &self.write_retry,
            || self.events.tail(channel_id),
            StoreError::is_retryable,
        )
        .await
        .map_err(|e| SchedulerError::from_store(channel_id, e))?;

        Ok(SchedulerCursor::from_tail(tail.as_ref()))
    }

    async fn fetch_feed(
        &self,
        channel: &Channel,
        now: DateTime<Utc>,
    ) -> SchedulerResult<NormalizedFeed> {
        let raw = self
            .feeds
            .fetch_items(channel)
            .await
            .map_err(|e| SchedulerError::from_feed(&channel.id, e))?;

        let feed = normalize(&raw, now);
        debug!(
            channel_id = %channel.id,
            raw = raw.len(),
            playable = feed.len(),
            dropped = feed.dropped.len(),
            deferred = feed.deferred.len(),
            "Feed normalized"
        );
        Ok(feed)
    }
}
