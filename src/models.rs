//! Core data structures for onair
//!
//! This module defines the identities and records shared by the scheduler,
//! the feed sources and the stores:
//!
//! - [`Channel`] - tenant-owned channel definition (read-only to the scheduler)
//! - [`RawFeedItem`] - an already-parsed MRSS entry as published
//! - [`PlayableItem`] - a normalized, schedulable unit
//! - [`ScheduleEvent`] - one on-air placement of an item on a channel
//! - [`TimeRange`] - half-open `[start, end)` window used by schedule queries

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Longest rolling horizon a channel may plan ahead (366 days)
pub const MAX_HORIZON_SECS: i64 = 366 * 24 * 3600;

// ============================================================================
// Identities
// ============================================================================

/// Channel identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Kind of linear channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// 24/7 linear channel
    #[default]
    Linear,
    /// Free ad-supported streaming channel
    Fast,
    /// Pop-up channel tied to an event
    Event,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Fast => "fast",
            Self::Event => "event",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(Self::Linear),
            "fast" => Some(Self::Fast),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant-owned channel definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(default)]
    pub channel_type: ChannelType,
    /// Rolling horizon override in seconds; `None` uses the scheduler default
    #[serde(default)]
    pub horizon_secs: Option<i64>,
    /// MRSS feed sources, in play order
    pub feeds: Vec<String>,
}

impl Channel {
    pub fn new(id: impl Into<String>, tenant: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ChannelId::new(id),
            tenant_id: TenantId::new(tenant),
            name: name.into(),
            channel_type: ChannelType::Linear,
            horizon_secs: None,
            feeds: Vec::new(),
        }
    }

    pub fn with_feed(mut self, url: impl Into<String>) -> Self {
        self.feeds.push(url.into());
        self
    }

    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon_secs = Some(horizon.num_seconds());
        self
    }

    pub fn with_type(mut self, channel_type: ChannelType) -> Self {
        self.channel_type = channel_type;
        self
    }

    /// Effective rolling horizon, capped at [`MAX_HORIZON_SECS`]
    pub fn horizon_or(&self, default: Duration) -> Duration {
        match self.horizon_secs {
            Some(secs) if secs > 0 => {
                Duration::try_seconds(secs.min(MAX_HORIZON_SECS)).unwrap_or(default)
            }
            _ => default,
        }
    }
}

// ============================================================================
// Feed items
// ============================================================================

/// An MRSS entry as published, before normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFeedItem {
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub available_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub available_until: Option<DateTime<Utc>>,
    /// Feed the entry came from (filled in by the feed source)
    #[serde(default)]
    pub source: Option<String>,
}

impl RawFeedItem {
    pub fn new(guid: impl Into<String>, duration_secs: i64) -> Self {
        Self {
            guid: Some(guid.into()),
            duration_secs: Some(duration_secs),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_window(
        mut self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.available_from = from;
        self.available_until = until;
        self
    }
}

/// A normalized, schedulable feed entry
///
/// Equality and hashing use the GUID only; two entries with the same GUID
/// are the same item regardless of their position in the feed.
#[derive(Debug, Clone)]
pub struct PlayableItem {
    pub guid: String,
    pub title: String,
    pub duration: Duration,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    pub source: String,
}

impl PlayableItem {
    /// Whether the availability window admits `at`
    pub fn is_available_at(&self, at: DateTime<Utc>) -> bool {
        let after_start = self.available_from.map_or(true, |from| at >= from);
        let before_end = self.available_until.map_or(true, |until| at < until);
        after_start && before_end
    }
}

impl PartialEq for PlayableItem {
    fn eq(&self, other: &Self) -> bool {
        self.guid == other.guid
    }
}

impl Eq for PlayableItem {}

impl Hash for PlayableItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.guid.hash(state);
    }
}

// ============================================================================
// Schedule events
// ============================================================================

/// Lifecycle status of a schedule event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Planned,
    Expired,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Expired => "expired",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(Self::Planned),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

/// One on-air placement of a playable item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub channel_id: ChannelId,
    /// Monotonic per channel; together with `channel_id` the idempotency key
    pub sequence: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub item_guid: String,
    pub title: String,
    /// How many times the feed had wrapped when this event was placed
    pub loop_pass: u32,
    pub status: EventStatus,
}

impl ScheduleEvent {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether the placement (ignoring status) matches another event
    ///
    /// Used to tell a retried write apart from a conflicting one. Times are
    /// compared at millisecond resolution, the precision stores keep.
    pub fn same_placement(&self, other: &ScheduleEvent) -> bool {
        self.channel_id == other.channel_id
            && self.sequence == other.sequence
            && self.start.timestamp_millis() == other.start.timestamp_millis()
            && self.end.timestamp_millis() == other.end.timestamp_millis()
            && self.item_guid == other.item_guid
            && self.loop_pass == other.loop_pass
    }

    /// Whether the event intersects `[range.start, range.end)`
    pub fn overlaps(&self, range: &TimeRange) -> bool {
        self.start < range.end && self.end > range.start
    }
}

// ============================================================================
// Time ranges
// ============================================================================

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The whole UTC day of `date`
    pub fn for_date(date: NaiveDate) -> Self {
        let start = date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    /// Window starting at `start` and lasting `length`
    pub fn starting_at(start: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start,
            end: start + length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}
