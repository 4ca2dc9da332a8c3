//! Per-channel scheduler state
//!
//! The orchestrator keeps one [`ChannelRecord`] per known channel in a
//! [`StateTable`]. Records are only mutated through the table's accessors,
//! and only by the driver: worker tasks report back, they never write
//! state themselves.
//!
//! ```text
//!            dispatch               reconciled
//!   Idle ───────────────▶ Running ──────────────▶ Idle
//!    ▲                      │  │
//!    │  backoff elapsed     │  │ feed failure / empty feed
//!    └──────── Starved ◀────┘  │
//!                              │ persistence failure
//!    Idle ◀── reset ── Failed ◀┘
//! ```

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::placement::{Placement, PlacementStart};
use crate::feed::{ItemPosition, NormalizedFeed};
use crate::models::{Channel, ChannelId, ScheduleEvent, TenantId};
use crate::utils::retry::RetryConfig;

/// Lifecycle state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Idle,
    Running,
    Starved,
    Failed,
}

impl ChannelState {
    pub const ALL: [ChannelState; 4] = [Self::Idle, Self::Running, Self::Starved, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Starved => "starved",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory scheduling progress of one channel
///
/// Volatile: the persisted tail is authoritative and the cursor is
/// re-derived from it before any write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerCursor {
    pub last_scheduled_end: Option<DateTime<Utc>>,
    pub last_sequence: u64,
    /// GUID and loop pass of the last placed item
    pub last_item: Option<(String, u32)>,
    pub feed_revision: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl SchedulerCursor {
    /// Cursor implied by the persisted tail
    pub fn from_tail(tail: Option<&ScheduleEvent>) -> Self {
        match tail {
            Some(event) => Self {
                last_scheduled_end: Some(event.end),
                last_sequence: event.sequence,
                last_item: Some((event.item_guid.clone(), event.loop_pass)),
                feed_revision: None,
                last_run_at: None,
            },
            None => Self::default(),
        }
    }

    /// Whether this cursor and `other` point at the same persisted tail
    pub fn same_tail(&self, other: &SchedulerCursor) -> bool {
        self.last_sequence == other.last_sequence
            && self.last_scheduled_end == other.last_scheduled_end
            && self.last_item == other.last_item
    }

    /// Feed position of the item after the last placed one
    pub fn next_position(&self, feed: &NormalizedFeed) -> ItemPosition {
        match &self.last_item {
            Some((guid, pass)) => feed.position_after(guid, *pass),
            None => ItemPosition::default(),
        }
    }

    /// Placement start for a fill beginning at `fill_from`
    pub fn placement_start(
        &self,
        fill_from: DateTime<Utc>,
        feed: &NormalizedFeed,
    ) -> PlacementStart {
        PlacementStart {
            cursor_time: fill_from,
            last_sequence: self.last_sequence,
            position: self.next_position(feed),
        }
    }

    /// Advance past a committed placement
    pub fn advance(&mut self, placement: &Placement) {
        if let Some(last) = placement.events.last() {
            self.last_scheduled_end = Some(last.end);
            self.last_sequence = last.sequence;
            self.last_item = Some((last.item_guid.clone(), last.loop_pass));
        }
    }
}

/// Everything the orchestrator tracks for one channel
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub channel: Channel,
    pub state: ChannelState,
    pub cursor: SchedulerCursor,
    pub consecutive_starvations: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_trim_at: Option<DateTime<Utc>>,
    /// Next dispatch ignores the in-memory cursor
    pub force_next: bool,
}

impl ChannelRecord {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            state: ChannelState::Idle,
            cursor: SchedulerCursor::default(),
            consecutive_starvations: 0,
            next_attempt_at: None,
            last_error: None,
            last_trim_at: None,
            force_next: false,
        }
    }

    /// Whether a regular tick may dispatch this channel at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            ChannelState::Idle => true,
            ChannelState::Starved => self.next_attempt_at.map_or(true, |at| at <= now),
            ChannelState::Running | ChannelState::Failed => false,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            channel_id: self.channel.id.clone(),
            tenant_id: self.channel.tenant_id.clone(),
            state: self.state,
            last_scheduled_end: self.cursor.last_scheduled_end,
            last_sequence: self.cursor.last_sequence,
            feed_revision: self.cursor.feed_revision.clone(),
            last_run_at: self.cursor.last_run_at,
            consecutive_starvations: self.consecutive_starvations,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Serializable snapshot of a channel's scheduler state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub channel_id: ChannelId,
    pub tenant_id: TenantId,
    pub state: ChannelState,
    pub last_scheduled_end: Option<DateTime<Utc>>,
    pub last_sequence: u64,
    pub feed_revision: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub consecutive_starvations: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Channels added and removed by a sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub registered: Vec<ChannelId>,
    pub forgotten: Vec<ChannelId>,
}

/// Work handed to a worker task
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub channel: Channel,
    pub cursor: SchedulerCursor,
    pub force: bool,
    pub trim_due: bool,
}

/// Explicit per-channel state keyed by channel id
#[derive(Debug, Default)]
pub struct StateTable {
    records: HashMap<ChannelId, ChannelRecord>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &ChannelId) -> Option<&ChannelRecord> {
        self.records.get(id)
    }

    pub fn state_of(&self, id: &ChannelId) -> Option<ChannelState> {
        self.records.get(id).map(|r| r.state)
    }

    /// Register new channels as Idle and forget vanished ones
    ///
    /// Known channels pick up definition changes. A Running channel is kept
    /// even if it disappeared; the next sync after it finishes drops it.
    pub fn sync(&mut self, channels: &[Channel]) -> SyncSummary {
        let mut summary = SyncSummary::default();

        for channel in channels {
            match self.records.get_mut(&channel.id) {
                Some(record) => record.channel = channel.clone(),
                None => {
                    summary.registered.push(channel.id.clone());
                    self.records
                        .insert(channel.id.clone(), ChannelRecord::new(channel.clone()));
                }
            }
        }

        self.records.retain(|id, record| {
            let present = channels.iter().any(|c| &c.id == id);
            if !present && record.state != ChannelState::Running {
                summary.forgotten.push(id.clone());
                false
            } else {
                true
            }
        });

        summary.forgotten.sort();
        summary
    }

    /// Channels a regular tick should dispatch at `now`
    pub fn eligible(&self, now: DateTime<Utc>) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self
            .records
            .values()
            .filter(|r| r.is_eligible(now))
            .map(|r| r.channel.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Channels currently Running
    pub fn running(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self
            .records
            .values()
            .filter(|r| r.state == ChannelState::Running)
            .map(|r| r.channel.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Transition a channel to Running and hand out its work
    ///
    /// Returns `None` if the channel is unknown or already Running.
    pub fn begin_run(
        &mut self,
        id: &ChannelId,
        force: bool,
        trim_due: impl Fn(Option<DateTime<Utc>>) -> bool,
    ) -> Option<Dispatch> {
        let record = self.records.get_mut(id)?;
        if record.state == ChannelState::Running {
            return None;
        }

        record.state = ChannelState::Running;
        let force = force || std::mem::take(&mut record.force_next);
        Some(Dispatch {
            channel: record.channel.clone(),
            cursor: record.cursor.clone(),
            force,
            trim_due: trim_due(record.last_trim_at),
        })
    }

    /// Record a completed pass; the channel returns to Idle
    pub fn finish_reconciled(
        &mut self,
        id: &ChannelId,
        cursor: SchedulerCursor,
        trimmed_at: Option<DateTime<Utc>>,
    ) {
        if let Some(record) = self.records.get_mut(id) {
            record.state = ChannelState::Idle;
            record.cursor = cursor;
            record.consecutive_starvations = 0;
            record.next_attempt_at = None;
            record.last_error = None;
            if trimmed_at.is_some() {
                record.last_trim_at = trimmed_at;
            }
        }
    }

    /// Record a starved pass and schedule the next attempt
    pub fn finish_starved(
        &mut self,
        id: &ChannelId,
        now: DateTime<Utc>,
        reason: String,
        backoff: &RetryConfig,
        trimmed_at: Option<DateTime<Utc>>,
    ) {
        if let Some(record) = self.records.get_mut(id) {
            record.state = ChannelState::Starved;
            record.consecutive_starvations = record.consecutive_starvations.saturating_add(1);
            let delay = backoff.delay_for(record.consecutive_starvations);
            let delay =
                chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));
            record.next_attempt_at = Some(now.checked_add_signed(delay).unwrap_or(now));
            record.last_error = Some(reason);
            record.cursor.last_run_at = Some(now);
            if trimmed_at.is_some() {
                record.last_trim_at = trimmed_at;
            }
        }
    }

    /// Record a failed pass; the channel waits for an operator reset
    pub fn finish_failed(&mut self, id: &ChannelId, now: DateTime<Utc>, reason: String) {
        if let Some(record) = self.records.get_mut(id) {
            record.state = ChannelState::Failed;
            record.last_error = Some(reason);
            record.next_attempt_at = None;
            record.cursor.last_run_at = Some(now);
        }
    }

    /// Release a channel whose pass was interrupted before reporting
    pub fn finish_interrupted(&mut self, id: &ChannelId) {
        if let Some(record) = self.records.get_mut(id) {
            if record.state == ChannelState::Running {
                record.state = ChannelState::Idle;
            }
        }
    }

    /// Return a Failed or Starved channel to Idle
    ///
    /// Returns the state before the reset, or `None` for an unknown channel.
    /// Running and Idle channels are left untouched.
    pub fn reset(&mut self, id: &ChannelId) -> Option<ChannelState> {
        let record = self.records.get_mut(id)?;
        let previous = record.state;
        if matches!(previous, ChannelState::Failed | ChannelState::Starved) {
            record.state = ChannelState::Idle;
            record.last_error = None;
            record.next_attempt_at = None;
            record.consecutive_starvations = 0;
            record.force_next = true;
        }
        Some(previous)
    }

    /// Snapshot of every channel, ordered by id
    pub fn statuses(&self) -> Vec<ChannelStatus> {
        let mut statuses: Vec<_> = self.records.values().map(ChannelRecord::status).collect();
        statuses.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        statuses
    }

    /// Number of channels per state
    pub fn state_counts(&self) -> Vec<(&'static str, usize)> {
        ChannelState::ALL
            .iter()
            .map(|state| {
                let count = self.records.values().filter(|r| r.state == *state).count();
                (state.as_str(), count)
            })
            .collect()
    }
}
