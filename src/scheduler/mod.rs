//! Linear channel auto-scheduler
//!
//! This module keeps every channel's on-air timeline filled to a rolling
//! horizon from its MRSS feeds.
//!
//! # Overview
//!
//! Each channel owns a contiguous, gap-free sequence of [`ScheduleEvent`]s.
//! On every tick the orchestrator checks whether the timeline still reaches
//! `now + horizon`; if not, the channel's feed is fetched, normalized and
//! looped until the gap is filled, and the new events are committed as one
//! idempotent batch. Persisted events are the single source of truth: all
//! in-memory progress is re-derived from the stored tail before writing.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                           │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐    │
//! │  │ StateTable  │  │   Ticker    │  │  Worker pool        │    │
//! │  │ (per chan.) │  │  + drain    │  │  (semaphore+JoinSet)│    │
//! │  └─────────────┘  └─────────────┘  └──────────┬──────────┘    │
//! └───────────────────────────────────────────────┼───────────────┘
//!                                                 │
//!                                          ┌──────▼──────┐
//!                                          │ Reconciler  │
//!                                          └──────┬──────┘
//!                    ┌────────────────────────────┼──────────────┐
//!                    ▼                            ▼              ▼
//!             ┌─────────────┐             ┌─────────────┐ ┌────────────┐
//!             │  Horizon    │             │  Placement  │ │ FeedSource │
//!             │ Maintainer  │             │  (pure)     │ │ EventStore │
//!             └─────────────┘             └─────────────┘ └────────────┘
//! ```
//!
//! # Modules
//!
//! - [`placement`] - Back-to-back placement of looping feed items
//! - [`horizon`] - Fill window and retention boundary computation
//! - [`reconcile`] - One idempotent pass for one channel
//! - [`state`] - Per-channel lifecycle state and cursors
//! - [`orchestrator`] - Tick loop, worker pool and operator controls
//! - [`error`] - Scheduler error taxonomy
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use onair::config::SchedulerConfig;
//! use onair::feed::StaticFeedSource;
//! use onair::scheduler::Orchestrator;
//! use onair::storage::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let feeds = Arc::new(StaticFeedSource::new());
//! let orchestrator = Orchestrator::new(
//!     SchedulerConfig::default(),
//!     store.clone(),
//!     feeds,
//!     store,
//! );
//!
//! orchestrator.bootstrap().await?;
//! orchestrator.run(tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```
//!
//! [`ScheduleEvent`]: crate::models::ScheduleEvent

pub mod error;
pub mod horizon;
pub mod orchestrator;
pub mod placement;
pub mod reconcile;
pub mod state;

pub use error::{SchedulerError, SchedulerResult};
pub use horizon::{HorizonMaintainer, HorizonPlan};
pub use orchestrator::{Orchestrator, PassResult, RunOutcome, TickSummary};
pub use placement::{place, Placement, PlacementStart};
pub use reconcile::{ReconcileReport, Reconciler};
pub use state::{ChannelRecord, ChannelState, ChannelStatus, SchedulerCursor, StateTable};
