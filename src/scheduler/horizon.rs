//! Rolling horizon maintenance
//!
//! Decides how much timeline a channel needs at a given instant and which
//! past events are old enough to expire.

use chrono::{DateTime, Duration, Utc};

use super::state::SchedulerCursor;
use crate::config::SchedulerConfig;
use crate::models::TimeRange;

/// What a channel needs at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HorizonPlan {
    pub now: DateTime<Utc>,
    /// `now + horizon`
    pub target_end: DateTime<Utc>,
    /// Window to fill, `None` when the horizon is already covered
    pub fill: Option<TimeRange>,
}

impl HorizonPlan {
    pub fn needs_fill(&self) -> bool {
        self.fill.is_some()
    }

    /// Start of the first new event
    pub fn fill_from(&self) -> Option<DateTime<Utc>> {
        self.fill.map(|range| range.start)
    }
}

/// Horizon and retention policy
#[derive(Debug, Clone)]
pub struct HorizonMaintainer {
    default_horizon: Duration,
    retention: Duration,
    trim_interval: Duration,
}

impl HorizonMaintainer {
    pub fn new(default_horizon: Duration, retention: Duration, trim_interval: Duration) -> Self {
        Self {
            default_horizon,
            retention,
            trim_interval,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.horizon(), config.retention(), config.trim_interval())
    }

    pub fn default_horizon(&self) -> Duration {
        self.default_horizon
    }

    /// Compute the fill needed so the timeline reaches `now + horizon`
    ///
    /// A timeline ending in the past is continued from `now`; the gap is
    /// not back-filled.
    pub fn plan(
        &self,
        now: DateTime<Utc>,
        cursor: &SchedulerCursor,
        horizon: Duration,
    ) -> HorizonPlan {
        let target_end = now + horizon;

        let fill = match cursor.last_scheduled_end {
            Some(end) if end >= target_end => None,
            Some(end) => Some(TimeRange::new(end.max(now), target_end)),
            None => Some(TimeRange::new(now, target_end)),
        };

        HorizonPlan {
            now,
            target_end,
            fill,
        }
    }

    /// Events ending before this instant are expired
    pub fn trim_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    /// Whether a trim pass is due given the last one
    pub fn trim_due(&self, now: DateTime<Utc>, last_trim_at: Option<DateTime<Utc>>) -> bool {
        last_trim_at.map_or(true, |last| now - last >= self.trim_interval)
    }
}
