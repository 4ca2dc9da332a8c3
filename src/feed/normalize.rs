//! Feed item normalization
//!
//! Turns a channel's raw entry list into the ordered, deduplicated
//! [`PlayableItem`] sequence used for placement:
//!
//! - publish order is play order
//! - the first entry for a GUID wins; later duplicates are ignored
//! - entries without identity or with a missing, non-positive or
//!   implausibly long duration are dropped and reported, never fatal
//! - entries whose availability window excludes the scheduling instant are
//!   deferred for this pass only
//!
//! [`LoopingItems`] then walks the sequence cyclically, counting wraps so
//! that repeated GUIDs remain distinct placements.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::models::{PlayableItem, RawFeedItem};

/// Longest single entry accepted from a feed (31 days)
pub const MAX_ITEM_DURATION_SECS: i64 = 31 * 24 * 3600;

/// Why an entry was dropped during normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Neither GUID nor media URL present
    MissingIdentity,
    /// No duration published
    MissingDuration,
    /// Duration is zero or negative
    NonPositiveDuration(i64),
    /// Duration exceeds [`MAX_ITEM_DURATION_SECS`]
    ExcessiveDuration(i64),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingIdentity => write!(f, "missing guid and media url"),
            Self::MissingDuration => write!(f, "missing duration"),
            Self::NonPositiveDuration(secs) => write!(f, "non-positive duration {secs}s"),
            Self::ExcessiveDuration(secs) => {
                write!(f, "duration {secs}s exceeds {MAX_ITEM_DURATION_SECS}s")
            }
        }
    }
}

/// An entry rejected during normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedItem {
    pub guid: Option<String>,
    pub reason: DropReason,
}

/// Position within a looping feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemPosition {
    pub index: usize,
    pub loop_pass: u32,
}

/// Result of normalizing one fetched feed
#[derive(Debug, Clone, Default)]
pub struct NormalizedFeed {
    /// Items available at the scheduling instant, in play order
    pub items: Vec<PlayableItem>,
    /// Entries rejected outright
    pub dropped: Vec<DroppedItem>,
    /// GUIDs skipped this pass because of their availability window
    pub deferred: Vec<String>,
    revision: String,
}

impl NormalizedFeed {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Content hash over every valid entry, deferred ones included
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Position of the item that follows `guid` played on `loop_pass`
    ///
    /// If `guid` is no longer in the feed the walk restarts at the first item
    /// on the next pass.
    pub fn position_after(&self, guid: &str, loop_pass: u32) -> ItemPosition {
        match self.items.iter().position(|item| item.guid == guid) {
            Some(index) if index + 1 < self.items.len() => ItemPosition {
                index: index + 1,
                loop_pass,
            },
            _ => ItemPosition {
                index: 0,
                loop_pass: loop_pass.saturating_add(1),
            },
        }
    }

    /// Endless walk over the items starting at `position`
    pub fn looping_from(&self, position: ItemPosition) -> LoopingItems<'_> {
        LoopingItems::new(&self.items, position)
    }
}

/// Normalize raw entries for scheduling at `now`
pub fn normalize(raw: &[RawFeedItem], now: DateTime<Utc>) -> NormalizedFeed {
    let mut seen = HashSet::new();
    let mut feed = NormalizedFeed::default();
    let mut hasher = Sha256::new();

    for entry in raw {
        let identity = entry
            .guid
            .as_deref()
            .or(entry.media_url.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let Some(guid) = identity else {
            drop_item(&mut feed, None, DropReason::MissingIdentity);
            continue;
        };

        let secs = match entry.duration_secs {
            None => {
                drop_item(&mut feed, Some(guid), DropReason::MissingDuration);
                continue;
            }
            Some(secs) if secs <= 0 => {
                drop_item(&mut feed, Some(guid), DropReason::NonPositiveDuration(secs));
                continue;
            }
            Some(secs) => secs,
        };

        let duration = match Duration::try_seconds(secs) {
            Some(duration) if secs <= MAX_ITEM_DURATION_SECS => duration,
            _ => {
                drop_item(&mut feed, Some(guid), DropReason::ExcessiveDuration(secs));
                continue;
            }
        };

        if !seen.insert(guid.to_string()) {
            tracing::debug!(guid = %guid, "Ignoring duplicate feed entry");
            continue;
        }

        hasher.update(guid.as_bytes());
        hasher.update(secs.to_le_bytes());

        let item = PlayableItem {
            guid: guid.to_string(),
            title: entry.title.clone().unwrap_or_else(|| guid.to_string()),
            duration,
            available_from: entry.available_from,
            available_until: entry.available_until,
            source: entry.source.clone().unwrap_or_default(),
        };

        if item.is_available_at(now) {
            feed.items.push(item);
        } else {
            feed.deferred.push(item.guid);
        }
    }

    let digest = hasher.finalize();
    feed.revision = format!("{digest:x}").chars().take(16).collect();
    feed
}

fn drop_item(feed: &mut NormalizedFeed, guid: Option<&str>, reason: DropReason) {
    tracing::warn!(guid = ?guid, reason = %reason, "Dropping feed entry");
    feed.dropped.push(DroppedItem {
        guid: guid.map(str::to_string),
        reason,
    });
}

/// Cyclic iterator over playable items
///
/// Yields `(position, item)` pairs forever unless the slice is empty.
pub struct LoopingItems<'a> {
    items: &'a [PlayableItem],
    position: ItemPosition,
}

impl<'a> LoopingItems<'a> {
    pub fn new(items: &'a [PlayableItem], position: ItemPosition) -> Self {
        let mut position = position;
        if !items.is_empty() && position.index >= items.len() {
            position = ItemPosition {
                index: 0,
                loop_pass: position.loop_pass.saturating_add(1),
            };
        }
        Self { items, position }
    }
}

impl<'a> Iterator for LoopingItems<'a> {
    type Item = (ItemPosition, &'a PlayableItem);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.get(self.position.index)?;
        let current = self.position;

        self.position = if current.index + 1 < self.items.len() {
            ItemPosition {
                index: current.index + 1,
                loop_pass: current.loop_pass,
            }
        } else {
            ItemPosition {
                index: 0,
                loop_pass: current.loop_pass.saturating_add(1),
            }
        };

        Some((current, item))
    }
}
