//! Error types for the scheduler module

use thiserror::Error;

use crate::feed::FeedError;
use crate::models::ChannelId;
use crate::storage::StoreError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Feed could not be fetched or parsed (transient)
    #[error("Feed unavailable for channel '{channel_id}': {reason}")]
    FeedUnavailable { channel_id: ChannelId, reason: String },

    /// Feed was reachable but yielded no schedulable items
    #[error("Feed for channel '{channel_id}' has no usable items")]
    EmptyFeed { channel_id: ChannelId },

    /// An existing event with the same idempotency key differs from ours
    #[error("Write conflict on channel '{channel_id}' at sequence {sequence}")]
    WriteConflict { channel_id: ChannelId, sequence: u64 },

    /// Store unreachable or write rejected after bounded retries
    #[error("Persistence failed for channel '{channel_id}': {reason}")]
    Persistence { channel_id: ChannelId, reason: String },

    /// Channel enumeration failed; the run loop cannot dispatch
    #[error("Failed to enumerate channels: {reason}")]
    ChannelEnumeration { reason: String },

    /// An item's end would fall outside the representable time range
    #[error("Item '{guid}' overflows the timeline of channel '{channel_id}'")]
    TimelineOverflow { channel_id: ChannelId, guid: String },
}

impl SchedulerError {
    /// Create an empty feed error
    pub fn empty_feed(channel_id: &ChannelId) -> Self {
        Self::EmptyFeed {
            channel_id: channel_id.clone(),
        }
    }

    /// Create a persistence error
    pub fn persistence(channel_id: &ChannelId, reason: impl Into<String>) -> Self {
        Self::Persistence {
            channel_id: channel_id.clone(),
            reason: reason.into(),
        }
    }

    pub fn timeline_overflow(channel_id: &ChannelId, guid: impl Into<String>) -> Self {
        Self::TimelineOverflow {
            channel_id: channel_id.clone(),
            guid: guid.into(),
        }
    }

    /// Map a feed source failure for `channel_id`
    pub fn from_feed(channel_id: &ChannelId, err: FeedError) -> Self {
        Self::FeedUnavailable {
            channel_id: channel_id.clone(),
            reason: err.to_string(),
        }
    }

    /// Map a store failure for `channel_id`
    pub fn from_store(channel_id: &ChannelId, err: StoreError) -> Self {
        match err {
            StoreError::Conflict { sequence, .. } => Self::WriteConflict {
                channel_id: channel_id.clone(),
                sequence,
            },
            other => Self::persistence(channel_id, other.to_string()),
        }
    }

    /// Whether the channel should be marked Starved rather than Failed
    pub fn is_starvation(&self) -> bool {
        matches!(
            self,
            Self::FeedUnavailable { .. } | Self::EmptyFeed { .. } | Self::TimelineOverflow { .. }
        )
    }

    /// Check if the error is recoverable without operator action
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FeedUnavailable { .. }
                | Self::EmptyFeed { .. }
                | Self::TimelineOverflow { .. }
                | Self::WriteConflict { .. }
        )
    }
}
