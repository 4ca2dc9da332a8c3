//! Persistence collaborators for channels and schedule events
//!
//! The scheduler only talks to storage through the traits defined here, so
//! the backing engine stays swappable:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Scheduler / Query layer / CLI                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          ChannelStore        ScheduleEventStore             │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//!        ┌─────────────────┐           ┌─────────────────┐
//!        │     SQLite      │           │     Memory      │
//!        │  (production)   │           │    (testing)    │
//!        └─────────────────┘           └─────────────────┘
//! ```
//!
//! `add` is atomic per call and write-once per `(channel_id, sequence)`:
//! re-inserting an identical event is a no-op, inserting a different event
//! under an existing key is rejected with [`StoreError::Conflict`] and none
//! of the batch lands.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Channel, ChannelId, ScheduleEvent, TenantId, TimeRange};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Different event already stored under the same idempotency key
    #[error("conflicting event already stored for channel '{channel_id}' at sequence {sequence}")]
    Conflict { channel_id: ChannelId, sequence: u64 },

    /// Backend unreachable or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// SQLite error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored row could not be decoded
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Conflicts are never fixed by retrying the same batch
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Conflict { .. } | Self::Corrupt(_))
    }
}

/// Outcome of an idempotent batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Newly written events
    pub inserted: usize,
    /// Events that were already stored with identical content
    pub unchanged: usize,
}

/// Read access to tenant-owned channel definitions
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// All known channels
    async fn list_all(&self) -> StoreResult<Vec<Channel>>;

    /// Channels owned by `tenant`
    async fn list_by_tenant(&self, tenant: &TenantId) -> StoreResult<Vec<Channel>>;

    /// Single channel by id
    async fn get(&self, id: &ChannelId) -> StoreResult<Option<Channel>>;
}

/// Schedule event persistence
#[async_trait]
pub trait ScheduleEventStore: Send + Sync {
    /// Events overlapping `range`, ordered by sequence
    ///
    /// Expired events are only returned when `include_expired` is set.
    async fn events_by_channel(
        &self,
        channel_id: &ChannelId,
        range: TimeRange,
        include_expired: bool,
    ) -> StoreResult<Vec<ScheduleEvent>>;

    /// Event with the highest sequence number, whatever its status
    async fn tail(&self, channel_id: &ChannelId) -> StoreResult<Option<ScheduleEvent>>;

    /// Atomically insert a batch, write-once per `(channel_id, sequence)`
    async fn add(&self, events: &[ScheduleEvent]) -> StoreResult<AddOutcome>;

    /// Mark Planned events ending before `before` as Expired
    ///
    /// Returns the number of events transitioned.
    async fn mark_expired(&self, channel_id: &ChannelId, before: DateTime<Utc>)
        -> StoreResult<usize>;
}
