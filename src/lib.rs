//! onair - MRSS-driven linear channel auto-scheduler
//!
//! Keeps every channel's on-air timeline filled to a rolling horizon from
//! the channel's MRSS feeds, looping content when the feed runs out, and
//! serves the resulting schedules over HTTP.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Channels, feed items, schedule events
//! - [`feed`] - Feed sources and item normalization
//! - [`scheduler`] - Placement, horizon upkeep, reconciliation, orchestration
//! - [`storage`] - Channel and schedule stores (SQLite, in-memory)
//! - [`query`] - Schedule read path shared by the API and CLI
//! - [`api`] - HTTP query and administration layer
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Retry and formatting helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use onair::config::Config;
//! use onair::feed::HttpFeedSource;
//! use onair::scheduler::Orchestrator;
//! use onair::storage::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStore::open(&config.database.sqlite_path)?);
//!     let feeds = Arc::new(HttpFeedSource::new(&config.feeds)?);
//!     let orchestrator = Orchestrator::new(config.scheduler, store.clone(), feeds, store);
//!     orchestrator.bootstrap().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod models;
pub mod query;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, OnairErrorTrait};
    pub use crate::feed::{FeedSource, HttpFeedSource, StaticFeedSource};
    pub use crate::models::{Channel, ChannelId, EventStatus, ScheduleEvent, TenantId, TimeRange};
    pub use crate::scheduler::{ChannelState, Orchestrator, SchedulerError};
    pub use crate::storage::{ChannelStore, MemoryStore, ScheduleEventStore, SqliteStore};
}

// Direct re-exports for convenience
pub use models::{Channel, ChannelId, ScheduleEvent};
