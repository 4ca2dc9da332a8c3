//! MRSS feed sources and item normalization
//!
//! A [`FeedSource`] hands back a channel's already-parsed feed entries in
//! publish order; [`normalize`] turns them into the ordered
//! [`PlayableItem`](crate::models::PlayableItem) sequence the scheduler places.
//!
//! - [`http`] - feed-gateway client (reqwest, rate limited, retried)
//! - [`normalize`] - dedup, duration and availability filtering, looping

pub mod http;
pub mod normalize;

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Channel, ChannelId, RawFeedItem};

pub use http::HttpFeedSource;
pub use normalize::{normalize, DropReason, DroppedItem, ItemPosition, LoopingItems, NormalizedFeed};

/// Errors raised while fetching a channel's feed
#[derive(Debug, Error)]
pub enum FeedError {
    /// Network or transport failure
    #[error("feed '{url}' unreachable: {reason}")]
    Unavailable { url: String, reason: String },

    /// Feed document could not be decoded
    #[error("feed '{url}' could not be parsed: {reason}")]
    Malformed { url: String, reason: String },

    /// Channel has no feed configured
    #[error("channel '{0}' has no feed sources")]
    NoSources(ChannelId),
}

impl FeedError {
    pub fn unavailable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Transport errors are worth retrying immediately; parse errors are not
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Source of a channel's parsed MRSS entries
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch all entries across the channel's feeds, in play order
    async fn fetch_items(&self, channel: &Channel) -> Result<Vec<RawFeedItem>, FeedError>;
}

/// In-memory feed source keyed by channel
///
/// Useful for tests and for channels whose playlist is provisioned locally.
#[derive(Default)]
pub struct StaticFeedSource {
    feeds: RwLock<HashMap<ChannelId, Result<Vec<RawFeedItem>, String>>>,
}

impl StaticFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the items served for a channel
    pub fn set_items(&self, channel_id: &ChannelId, items: Vec<RawFeedItem>) {
        if let Ok(mut feeds) = self.feeds.write() {
            feeds.insert(channel_id.clone(), Ok(items));
        }
    }

    /// Make fetches for a channel fail until items are set again
    pub fn set_unavailable(&self, channel_id: &ChannelId, reason: impl Into<String>) {
        if let Ok(mut feeds) = self.feeds.write() {
            feeds.insert(channel_id.clone(), Err(reason.into()));
        }
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch_items(&self, channel: &Channel) -> Result<Vec<RawFeedItem>, FeedError> {
        let url = format!("static://{}", channel.id);
        let feeds = self
            .feeds
            .read()
            .map_err(|_| FeedError::unavailable(&url, "feed table lock poisoned"))?;

        match feeds.get(&channel.id) {
            Some(Ok(items)) => Ok(items
                .iter()
                .cloned()
                .map(|mut item| {
                    item.source.get_or_insert_with(|| url.clone());
                    item
                })
                .collect()),
            Some(Err(reason)) => Err(FeedError::unavailable(url, reason.clone())),
            None => Ok(Vec::new()),
        }
    }
}
