//! Read-side schedule queries
//!
//! Shared by the HTTP API and the `schedule` CLI command. Without an
//! explicit window only upcoming Planned events are returned; an explicit
//! date or range also returns Expired history.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::models::{Channel, ChannelId, ScheduleEvent, TimeRange};
use crate::storage::{ChannelStore, ScheduleEventStore, StoreResult};

/// Which part of a channel's timeline to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleWindow {
    /// From now to the end of the channel's horizon
    Upcoming,
    /// One UTC calendar day
    Date(NaiveDate),
    /// Explicit `[start, end)`
    Range(TimeRange),
}

impl ScheduleWindow {
    /// Build a window from optional query parameters
    ///
    /// # Errors
    ///
    /// Returns a message when the parameters are contradictory or incomplete.
    pub fn from_params(
        date: Option<NaiveDate>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, String> {
        match (date, start, end) {
            (None, None, None) => Ok(Self::Upcoming),
            (Some(date), None, None) => Ok(Self::Date(date)),
            (None, Some(start), Some(end)) => {
                let range = TimeRange::new(start, end);
                if range.is_empty() {
                    Err("end must be after start".to_string())
                } else {
                    Ok(Self::Range(range))
                }
            }
            (Some(_), _, _) => Err("date cannot be combined with start/end".to_string()),
            _ => Err("start and end must be given together".to_string()),
        }
    }

    /// Concrete range and whether Expired events are included
    pub fn resolve(&self, now: DateTime<Utc>, horizon: Duration) -> (TimeRange, bool) {
        match self {
            Self::Upcoming => (TimeRange::starting_at(now, horizon), false),
            Self::Date(date) => (TimeRange::for_date(*date), true),
            Self::Range(range) => (*range, true),
        }
    }
}

/// A channel together with the events of the requested window
#[derive(Debug, Clone)]
pub struct ChannelSchedule {
    pub channel: Channel,
    pub range: TimeRange,
    pub events: Vec<ScheduleEvent>,
}

/// Read a channel's schedule; `None` if the channel is unknown
pub async fn channel_schedule(
    channels: &dyn ChannelStore,
    events: &dyn ScheduleEventStore,
    channel_id: &ChannelId,
    window: ScheduleWindow,
    now: DateTime<Utc>,
    default_horizon: Duration,
) -> StoreResult<Option<ChannelSchedule>> {
    let Some(channel) = channels.get(channel_id).await? else {
        return Ok(None);
    };

    let (range, include_expired) = window.resolve(now, channel.horizon_or(default_horizon));
    let events = events
        .events_by_channel(channel_id, range, include_expired)
        .await?;

    Ok(Some(ChannelSchedule {
        channel,
        range,
        events,
    }))
}
