//! Prometheus metrics for the onair auto-scheduler
//!
//! This module provides metrics tracking for:
//! - Reconciliation: passes by outcome, duration, events written
//! - Horizon trimming: events expired
//! - Feed fetches: failures per channel
//! - Orchestrator: channels per lifecycle state
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all scheduler metrics
struct SchedulerMetrics {
    reconciliations: CounterVec,
    reconcile_duration: HistogramVec,
    events_written: CounterVec,
    events_expired: CounterVec,
    feed_failures: CounterVec,
    channels_by_state: GaugeVec,
}

/// Global storage for scheduler metrics
static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = onair::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = SchedulerMetrics {
        reconciliations: register_counter_vec!(
            "onair_reconciliations_total",
            "Reconciliation passes by outcome",
            &["outcome"]
        )?,
        reconcile_duration: register_histogram_vec!(
            "onair_reconcile_duration_seconds",
            "Time spent reconciling one channel in seconds",
            &["outcome"],
            vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
        events_written: register_counter_vec!(
            "onair_events_written_total",
            "Schedule events inserted per channel",
            &["channel"]
        )?,
        events_expired: register_counter_vec!(
            "onair_events_expired_total",
            "Schedule events marked Expired per channel",
            &["channel"]
        )?,
        feed_failures: register_counter_vec!(
            "onair_feed_failures_total",
            "Feed fetches that failed or yielded no items",
            &["channel", "kind"]
        )?,
        channels_by_state: register_gauge_vec!(
            "onair_channels",
            "Channels known to the orchestrator by lifecycle state",
            &["state"]
        )?,
    };

    SCHEDULER_METRICS
        .set(metrics)
        .map_err(|_| "Scheduler metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCHEDULER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one finished reconciliation pass
pub fn record_reconciliation(outcome: &str, duration_secs: f64) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    m.reconciliations.with_label_values(&[outcome]).inc();
    m.reconcile_duration
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

/// Record events inserted for a channel
pub fn record_events_written(channel: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.events_written
            .with_label_values(&[channel])
            .inc_by(count as f64);
    }
}

/// Record events expired by a trim pass
pub fn record_events_expired(channel: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.events_expired
            .with_label_values(&[channel])
            .inc_by(count as f64);
    }
}

/// Record a feed failure (`kind` is `unavailable` or `empty`)
pub fn record_feed_failure(channel: &str, kind: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.feed_failures.with_label_values(&[channel, kind]).inc();
    }
}

/// Publish the per-state channel counts
pub fn update_channel_states(counts: &[(&str, usize)]) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    for (state, count) in counts {
        m.channels_by_state
            .with_label_values(&[state])
            .set(*count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
