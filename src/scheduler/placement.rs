//! Timeline placement
//!
//! Lays playable items back to back on a channel timeline. Placement is a
//! pure function of its inputs: the same start, feed and target always
//! produce the same events, which is what makes re-running a pass after a
//! crash safe.

use chrono::{DateTime, Utc};

use super::error::{SchedulerError, SchedulerResult};
use crate::feed::{ItemPosition, NormalizedFeed};
use crate::models::{ChannelId, EventStatus, ScheduleEvent};

/// Where a placement pass begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementStart {
    /// Start of the first new event
    pub cursor_time: DateTime<Utc>,
    /// Sequence of the last persisted event (0 if none)
    pub last_sequence: u64,
    /// Feed position of the first item to place
    pub position: ItemPosition,
}

impl PlacementStart {
    /// Start for a channel with no schedule yet
    pub fn fresh(at: DateTime<Utc>) -> Self {
        Self {
            cursor_time: at,
            last_sequence: 0,
            position: ItemPosition::default(),
        }
    }
}

/// Result of one placement pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// New events, contiguous and in sequence order
    pub events: Vec<ScheduleEvent>,
    /// Feed position the next pass continues from
    pub next_position: ItemPosition,
    /// End of the last placed event (the start time if nothing was placed)
    pub end: DateTime<Utc>,
}

impl Placement {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.events.last().map(|e| e.sequence)
    }
}

/// Place items from `start` until the timeline reaches `target_end`
///
/// The last event may run past `target_end`; items are never truncated.
///
/// # Errors
///
/// Returns `SchedulerError::EmptyFeed` if there is time to fill but the feed
/// has no items, and `SchedulerError::TimelineOverflow` if an item would end
/// past the last representable instant.
pub fn place(
    channel_id: &ChannelId,
    start: PlacementStart,
    feed: &NormalizedFeed,
    target_end: DateTime<Utc>,
) -> SchedulerResult<Placement> {
    if start.cursor_time >= target_end {
        return Ok(Placement {
            events: Vec::new(),
            next_position: start.position,
            end: start.cursor_time,
        });
    }

    if feed.is_empty() {
        return Err(SchedulerError::empty_feed(channel_id));
    }

    let mut events = Vec::new();
    let mut cursor = start.cursor_time;
    let mut sequence = start.last_sequence;
    let mut walk = feed.looping_from(start.position);
    let mut next_position = start.position;

    while cursor < target_end {
        // Non-empty feed: the walk never ends
        let Some((position, item)) = walk.next() else {
            break;
        };

        let end = cursor
            .checked_add_signed(item.duration)
            .ok_or_else(|| SchedulerError::timeline_overflow(channel_id, &item.guid))?;

        sequence += 1;
        events.push(ScheduleEvent {
            channel_id: channel_id.clone(),
            sequence,
            start: cursor,
            end,
            item_guid: item.guid.clone(),
            title: item.title.clone(),
            loop_pass: position.loop_pass,
            status: EventStatus::Planned,
        });

        cursor = end;
        next_position = feed.position_after(&item.guid, position.loop_pass);
    }

    Ok(Placement {
        events,
        next_position,
        end: cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::normalize;
    use crate::models::RawFeedItem;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn feed(durations: &[i64]) -> NormalizedFeed {
        let raw: Vec<_> = durations
            .iter()
            .enumerate()
            .map(|(i, secs)| RawFeedItem::new(format!("ep-{i}"), *secs))
            .collect();
        normalize(&raw, t0())
    }

    #[test]
    fn test_looping_feed_fills_two_hours() {
        let feed = feed(&[30 * 60, 45 * 60]);
        let id = ChannelId::from("news");

        let placement = place(&id, PlacementStart::fresh(t0()), &feed, t0() + Duration::hours(2))
            .unwrap();

        let spans: Vec<_> = placement
            .events
            .iter()
            .map(|e| ((e.start - t0()).num_minutes(), (e.end - t0()).num_minutes()))
            .collect();
        assert_eq!(spans, vec![(0, 30), (30, 75), (75, 105), (105, 150)]);

        let keys: Vec<_> = placement
            .events
            .iter()
            .map(|e| (e.sequence, e.item_guid.as_str(), e.loop_pass))
            .collect();
        assert_eq!(
            keys,
            vec![(1, "ep-0", 0), (2, "ep-1", 0), (3, "ep-0", 1), (4, "ep-1", 1)]
        );
        assert_eq!(placement.next_position, ItemPosition { index: 0, loop_pass: 2 });
    }

    #[test]
    fn test_overshoot_is_not_truncated() {
        let feed = feed(&[3600]);
        let id = ChannelId::from("news");
        let placement = place(
            &id,
            PlacementStart::fresh(t0()),
            &feed,
            t0() + Duration::minutes(10),
        )
        .unwrap();

        assert_eq!(placement.events.len(), 1);
        assert_eq!(placement.end, t0() + Duration::hours(1));
    }

    #[test]
    fn test_continues_sequence_and_position() {
        let feed = feed(&[600, 600, 600]);
        let id = ChannelId::from("news");
        let start = PlacementStart {
            cursor_time: t0(),
            last_sequence: 41,
            position: ItemPosition { index: 2, loop_pass: 5 },
        };

        let placement = place(&id, start, &feed, t0() + Duration::minutes(20)).unwrap();
        assert_eq!(placement.events[0].sequence, 42);
        assert_eq!(placement.events[0].item_guid, "ep-2");
        assert_eq!(placement.events[0].loop_pass, 5);
        assert_eq!(placement.events[1].item_guid, "ep-0");
        assert_eq!(placement.events[1].loop_pass, 6);
    }

    #[test]
    fn test_already_filled_places_nothing() {
        let id = ChannelId::from("news");
        let placement = place(
            &id,
            PlacementStart::fresh(t0() + Duration::hours(3)),
            &NormalizedFeed::default(),
            t0() + Duration::hours(2),
        )
        .unwrap();
        assert!(placement.is_empty());
        assert_eq!(placement.end, t0() + Duration::hours(3));
    }

    #[test]
    fn test_empty_feed_is_error() {
        let id = ChannelId::from("news");
        let err = place(
            &id,
            PlacementStart::fresh(t0()),
            &NormalizedFeed::default(),
            t0() + Duration::hours(1),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::EmptyFeed { .. }));
    }

    #[test]
    fn test_end_past_max_time_is_overflow() {
        let id = ChannelId::from("news");
        let near_end = DateTime::<Utc>::MAX_UTC - Duration::minutes(10);
        let err = place(
            &id,
            PlacementStart::fresh(near_end),
            &feed(&[1800]),
            DateTime::<Utc>::MAX_UTC,
        )
        .unwrap_err();

        assert!(matches!(err, SchedulerError::TimelineOverflow { ref guid, .. } if guid == "ep-0"));
        assert!(err.is_starvation());
    }

    proptest! {
        #[test]
        fn prop_placement_is_contiguous_and_covers_target(
            durations in prop::collection::vec(1i64..7200, 1..8),
            horizon_mins in 1i64..(3 * 24 * 60),
            last_sequence in 0u64..1000,
        ) {
            let feed = feed(&durations);
            let id = ChannelId::from("prop");
            let start = PlacementStart {
                cursor_time: t0(),
                last_sequence,
                position: ItemPosition::default(),
            };
            let target = t0() + Duration::minutes(horizon_mins);

            let placement = place(&id, start, &feed, target).unwrap();

            prop_assert!(!placement.events.is_empty());
            prop_assert_eq!(placement.events[0].start, t0());
            for pair in placement.events.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
                prop_assert_eq!(pair[0].sequence + 1, pair[1].sequence);
            }
            prop_assert_eq!(placement.events[0].sequence, last_sequence + 1);
            prop_assert!(placement.end >= target);

            // Dropping the last event would leave a gap before the target
            let last = placement.events.last().unwrap();
            prop_assert!(last.start < target);
        }
    }
}
