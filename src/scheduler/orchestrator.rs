//! Scheduler orchestrator
//!
//! Drives reconciliation for every channel on a fixed tick:
//!
//! ```text
//!   ticker ──▶ drain outcomes ──▶ enumerate channels ──▶ sync StateTable
//!                  ▲                                          │
//!                  │ mpsc                                     ▼
//!            ┌─────┴──────┐   semaphore permit   ┌──────────────────────┐
//!            │ worker task│ ◀─────────────────── │ dispatch Idle/Starved│
//!            │ reconcile  │                      │ (mark Running)       │
//!            │ + trim     │                      └──────────────────────┘
//!            └────────────┘
//! ```
//!
//! Only the driver applies state transitions. Worker tasks report a
//! [`RunOutcome`] over an mpsc channel; a task that panics or is aborted
//! reports an interrupted outcome from its drop guard so the channel never
//! stays Running.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SubsecRound, Utc};
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::error::{SchedulerError, SchedulerResult};
use super::horizon::HorizonMaintainer;
use super::reconcile::{ReconcileReport, Reconciler};
use super::state::{ChannelState, ChannelStatus, Dispatch, StateTable};
use crate::config::SchedulerConfig;
use crate::error::OnairErrorTrait;
use crate::feed::FeedSource;
use crate::metrics;
use crate::models::ChannelId;
use crate::storage::{ChannelStore, ScheduleEventStore};
use crate::utils::retry::RetryConfig;

/// How a worker task ended
#[derive(Debug)]
pub enum PassResult {
    Reconciled(ReconcileReport),
    Failed(SchedulerError),
    /// Panicked or aborted before reporting
    Interrupted,
}

/// Message from a worker task to the driver
#[derive(Debug)]
pub struct RunOutcome {
    pub channel_id: ChannelId,
    /// Scheduling instant of the pass; backoff is measured from it
    pub finished_at: DateTime<Utc>,
    pub trimmed_at: Option<DateTime<Utc>>,
    pub result: PassResult,
}

/// What a tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub registered: usize,
    pub forgotten: usize,
    pub dispatched: Vec<ChannelId>,
    /// Channels skipped because a previous pass is still Running
    pub skipped_running: Vec<ChannelId>,
    pub outcomes_applied: usize,
}

/// Sends an interrupted outcome unless the task reported normally
struct OutcomeGuard {
    tx: mpsc::UnboundedSender<RunOutcome>,
    channel_id: ChannelId,
    reported: bool,
}

impl OutcomeGuard {
    fn report(mut self, outcome: RunOutcome) {
        self.reported = true;
        let _ = self.tx.send(outcome);
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if !self.reported {
            let _ = self.tx.send(RunOutcome {
                channel_id: self.channel_id.clone(),
                finished_at: Utc::now(),
                trimmed_at: None,
                result: PassResult::Interrupted,
            });
        }
    }
}

/// Auto-scheduler driver
pub struct Orchestrator {
    channels: Arc<dyn ChannelStore>,
    reconciler: Arc<Reconciler>,
    config: SchedulerConfig,
    backoff: RetryConfig,
    state: RwLock<StateTable>,
    semaphore: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    outcome_tx: mpsc::UnboundedSender<RunOutcome>,
    outcome_rx: Mutex<mpsc::UnboundedReceiver<RunOutcome>>,
}

impl Orchestrator {
    pub fn new(
        config: SchedulerConfig,
        channels: Arc<dyn ChannelStore>,
        feeds: Arc<dyn FeedSource>,
        events: Arc<dyn ScheduleEventStore>,
    ) -> Self {
        let reconciler = Reconciler::new(
            feeds,
            events,
            HorizonMaintainer::from_config(&config),
            config.write_retry(),
        );
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        Self {
            channels,
            reconciler: Arc::new(reconciler),
            backoff: config.starved_backoff(),
            semaphore: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            config,
            state: RwLock::new(StateTable::new()),
            tasks: Mutex::new(JoinSet::new()),
            outcome_tx,
            outcome_rx: Mutex::new(outcome_rx),
        }
    }

    /// Force a pass for every known channel and wait for all of them
    ///
    /// Cursors are established from storage regardless of in-memory state.
    pub async fn bootstrap(&self) -> SchedulerResult<TickSummary> {
        let now = Utc::now();
        info!("Bootstrapping channel schedules");
        let summary = self.dispatch_round(now, true).await?;
        self.wait_idle().await;

        let statuses = self.statuses().await;
        let failed = statuses
            .iter()
            .filter(|s| s.state != ChannelState::Idle)
            .count();
        info!(
            channels = statuses.len(),
            not_idle = failed,
            "Bootstrap complete"
        );
        Ok(summary)
    }

    /// One regular tick at the current time
    pub async fn tick(&self) -> SchedulerResult<TickSummary> {
        self.tick_at(Utc::now()).await
    }

    /// One regular tick at `now`
    ///
    /// # Errors
    ///
    /// Returns `ChannelEnumeration` if the channel store cannot be listed.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> SchedulerResult<TickSummary> {
        self.dispatch_round(now, false).await
    }

    /// Wait until no worker task is in flight and apply their outcomes
    pub async fn wait_idle(&self) {
        {
            let mut tasks = self.tasks.lock().await;
            while let Some(joined) = tasks.join_next().await {
                log_join_error(joined);
            }
        }
        self.drain_outcomes().await;
    }

    /// Bootstrap, then tick until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Channel enumeration failure stops the loop and is returned.
    pub async fn run<F>(&self, shutdown: F) -> SchedulerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if let Err(e) = self.bootstrap().await {
            self.shutdown().await;
            return Err(e);
        }

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; bootstrap already covered it
        ticker.tick().await;

        info!(
            tick_interval_secs = self.config.tick_interval_secs,
            workers = self.config.worker_pool_size,
            "Scheduler run loop started"
        );

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping run loop");
                    break Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Channel enumeration failed, stopping run loop");
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown().await;
        result
    }

    /// Let in-flight passes finish within the grace period, abort the rest
    pub async fn shutdown(&self) {
        let grace = self.config.shutdown_grace();
        {
            let mut tasks = self.tasks.lock().await;
            let in_flight = tasks.len();
            if in_flight > 0 {
                info!(in_flight, grace_secs = grace.as_secs(), "Waiting for in-flight passes");
            }

            let drained = tokio::time::timeout(grace, async {
                while let Some(joined) = tasks.join_next().await {
                    log_join_error(joined);
                }
            })
            .await;

            if drained.is_err() {
                warn!(remaining = tasks.len(), "Grace period elapsed, aborting passes");
                tasks.abort_all();
                while let Some(joined) = tasks.join_next().await {
                    if let Err(e) = joined {
                        if !e.is_cancelled() {
                            error!(error = %e, "Channel pass failed during shutdown");
                        }
                    }
                }
            }
        }
        self.drain_outcomes().await;
    }

    /// Return a Failed or Starved channel to Idle
    ///
    /// Its next dispatch is forced. Returns the state before the reset, or
    /// `None` if the channel is unknown.
    pub async fn reset_channel(&self, id: &ChannelId) -> Option<ChannelState> {
        self.drain_outcomes().await;
        let mut state = self.state.write().await;
        let previous = state.reset(id)?;
        if matches!(previous, ChannelState::Failed | ChannelState::Starved) {
            info!(channel_id = %id, previous = %previous, "Channel reset by operator");
        }
        metrics::update_channel_states(&state.state_counts());
        Some(previous)
    }

    /// Snapshot of every known channel
    pub async fn statuses(&self) -> Vec<ChannelStatus> {
        self.drain_outcomes().await;
        self.state.read().await.statuses()
    }

    /// Snapshot of one channel
    pub async fn status(&self, id: &ChannelId) -> Option<ChannelStatus> {
        self.drain_outcomes().await;
        self.state.read().await.get(id).map(|r| r.status())
    }

    async fn dispatch_round(&self, now: DateTime<Utc>, force: bool) -> SchedulerResult<TickSummary> {
        // Stores keep milliseconds; finer instants would not survive a round trip
        let now = now.trunc_subsecs(3);
        let outcomes_applied = self.drain_outcomes().await;
        self.reap_finished().await;

        let channels = self
            .channels
            .list_all()
            .await
            .map_err(|e| SchedulerError::ChannelEnumeration {
                reason: e.to_string(),
            })?;

        let mut summary = TickSummary {
            outcomes_applied,
            ..Default::default()
        };

        let dispatches = {
            let mut state = self.state.write().await;
            let sync = state.sync(&channels);
            for id in &sync.registered {
                debug!(channel_id = %id, "Registered channel");
            }
            for id in &sync.forgotten {
                info!(channel_id = %id, "Forgot removed channel");
            }
            summary.registered = sync.registered.len();
            summary.forgotten = sync.forgotten.len();
            summary.skipped_running = state.running();

            let candidates = if force {
                let mut all: Vec<_> = channels.iter().map(|c| c.id.clone()).collect();
                all.sort();
                all
            } else {
                state.eligible(now)
            };

            let horizon = self.reconciler.horizon();
            let dispatches: Vec<_> = candidates
                .iter()
                .filter_map(|id| state.begin_run(id, force, |last| horizon.trim_due(now, last)))
                .collect();

            metrics::update_channel_states(&state.state_counts());
            dispatches
        };

        if !summary.skipped_running.is_empty() {
            debug!(
                channels = ?summary.skipped_running,
                "Skipping channels with a pass in flight"
            );
        }

        let mut tasks = self.tasks.lock().await;
        for dispatch in dispatches {
            summary.dispatched.push(dispatch.channel.id.clone());
            self.spawn_pass(&mut tasks, dispatch, now);
        }

        Ok(summary)
    }

    fn spawn_pass(&self, tasks: &mut JoinSet<()>, dispatch: Dispatch, now: DateTime<Utc>) {
        let reconciler = Arc::clone(&self.reconciler);
        let semaphore = Arc::clone(&self.semaphore);
        let guard = OutcomeGuard {
            tx: self.outcome_tx.clone(),
            channel_id: dispatch.channel.id.clone(),
            reported: false,
        };
        let span = tracing::info_span!(
            "channel_pass",
            channel_id = %dispatch.channel.id,
            run_id = %Uuid::new_v4(),
            force = dispatch.force,
        );

        tasks.spawn(
            async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };

                let started = Instant::now();
                let channel_id = dispatch.channel.id.clone();
                let result = reconciler
                    .reconcile(&dispatch.channel, &dispatch.cursor, now, dispatch.force)
                    .await;

                // Trimming never depends on the placement result
                let trimmed_at = if dispatch.trim_due {
                    match reconciler.trim(&channel_id, now).await {
                        Ok(expired) => {
                            metrics::record_events_expired(channel_id.as_str(), expired);
                            Some(now)
                        }
                        Err(e) => {
                            warn!(error = %e, "Trim failed");
                            None
                        }
                    }
                } else {
                    None
                };

                let (label, result) = match result {
                    Ok(report) => {
                        metrics::record_events_written(channel_id.as_str(), report.inserted);
                        let label = if report.wrote() { "filled" } else { "covered" };
                        (label, PassResult::Reconciled(report))
                    }
                    Err(e) => {
                        let label = if e.is_starvation() { "starved" } else { "failed" };
                        (label, PassResult::Failed(e))
                    }
                };
                metrics::record_reconciliation(label, started.elapsed().as_secs_f64());

                guard.report(RunOutcome {
                    channel_id,
                    finished_at: now,
                    trimmed_at,
                    result,
                });
            }
            .instrument(span),
        );
    }

    /// Collect finished tasks without waiting
    async fn reap_finished(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(Some(joined)) = tasks.join_next().now_or_never() {
            log_join_error(joined);
        }
    }

    /// Apply every pending outcome; returns how many were applied
    async fn drain_outcomes(&self) -> usize {
        let mut pending = Vec::new();
        {
            let mut rx = self.outcome_rx.lock().await;
            while let Ok(outcome) = rx.try_recv() {
                pending.push(outcome);
            }
        }
        if pending.is_empty() {
            return 0;
        }

        let applied = pending.len();
        let mut state = self.state.write().await;
        for outcome in pending {
            self.apply_outcome(&mut state, outcome);
        }
        metrics::update_channel_states(&state.state_counts());
        applied
    }

    fn apply_outcome(&self, state: &mut StateTable, outcome: RunOutcome) {
        let id = &outcome.channel_id;
        match outcome.result {
            PassResult::Reconciled(report) => {
                if report.recovered {
                    debug!(channel_id = %id, "Cursor re-derived from persisted tail");
                }
                state.finish_reconciled(id, report.cursor, outcome.trimmed_at);
            }
            PassResult::Failed(e) if e.is_starvation() => {
                let kind = match e {
                    SchedulerError::EmptyFeed { .. } => "empty",
                    SchedulerError::TimelineOverflow { .. } => "overflow",
                    _ => "unavailable",
                };
                metrics::record_feed_failure(id.as_str(), kind);
                state.finish_starved(
                    id,
                    outcome.finished_at,
                    e.to_string(),
                    &self.backoff,
                    outcome.trimmed_at,
                );
                if let Some(record) = state.get(id) {
                    warn!(
                        channel_id = %id,
                        error = %e,
                        category = %e.category(),
                        attempts = record.consecutive_starvations,
                        next_attempt_at = ?record.next_attempt_at,
                        "Channel starved"
                    );
                }
            }
            PassResult::Failed(e) => {
                error!(
                    channel_id = %id,
                    error = %e,
                    category = %e.category(),
                    "Channel failed, waiting for reset"
                );
                state.finish_failed(id, outcome.finished_at, e.to_string());
            }
            PassResult::Interrupted => {
                warn!(channel_id = %id, "Channel pass interrupted");
                state.finish_interrupted(id);
            }
        }
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Channel pass panicked");
        }
    }
}
