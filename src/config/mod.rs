//! Configuration management for onair
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Every tunable of the scheduler (tick interval,
//! horizon, retention, backoff, pool size) lives here rather than in code.

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{Channel, MAX_HORIZON_SECS};
use crate::utils::retry::RetryConfig;

/// Longest retention and trim interval accepted (ten years)
pub const MAX_RETENTION_SECS: i64 = 3660 * 24 * 3600;

fn bounded_seconds(secs: i64, max: i64) -> ChronoDuration {
    ChronoDuration::try_seconds(secs.clamp(0, max)).unwrap_or_else(ChronoDuration::zero)
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Auto-scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Feed gateway configuration
    pub feeds: FeedConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Query API configuration
    pub api: ApiConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Channels imported into the channel store at startup
    pub channels: Vec<Channel>,
}

/// Auto-scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between run-loop ticks
    pub tick_interval_secs: u64,

    /// Default rolling horizon in seconds
    pub horizon_secs: i64,

    /// How long past events stay Planned before being expired, in seconds
    pub retention_secs: i64,

    /// Minimum seconds between two trim passes of one channel
    pub trim_interval_secs: i64,

    /// Maximum number of channels reconciled concurrently
    pub worker_pool_size: usize,

    /// First backoff delay for a starved channel, in seconds
    pub starved_backoff_base_secs: u64,

    /// Backoff cap for a starved channel, in seconds
    pub starved_backoff_max_secs: u64,

    /// Retries for a failed schedule write before the channel is Failed
    pub write_max_retries: u32,

    /// Base delay between write retries, in milliseconds
    pub write_retry_base_ms: u64,

    /// Seconds in-flight reconciliations get to finish on shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            horizon_secs: 24 * 3600,
            retention_secs: 24 * 3600,
            trim_interval_secs: 300,
            worker_pool_size: 8,
            starved_backoff_base_secs: 60,
            starved_backoff_max_secs: 900,
            write_max_retries: 3,
            write_retry_base_ms: 500,
            shutdown_grace_secs: 30,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    #[must_use]
    pub fn horizon(&self) -> ChronoDuration {
        bounded_seconds(self.horizon_secs, MAX_HORIZON_SECS)
    }

    #[must_use]
    pub fn retention(&self) -> ChronoDuration {
        bounded_seconds(self.retention_secs, MAX_RETENTION_SECS)
    }

    #[must_use]
    pub fn trim_interval(&self) -> ChronoDuration {
        bounded_seconds(self.trim_interval_secs, MAX_RETENTION_SECS)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Backoff schedule for starved channels
    #[must_use]
    pub fn starved_backoff(&self) -> RetryConfig {
        RetryConfig::with_delays(
            u32::MAX,
            self.starved_backoff_base_secs.saturating_mul(1000),
            self.starved_backoff_max_secs.saturating_mul(1000),
        )
    }

    /// Retry policy for schedule writes
    #[must_use]
    pub fn write_retry(&self) -> RetryConfig {
        RetryConfig::with_delays(
            self.write_max_retries,
            self.write_retry_base_ms,
            self.write_retry_base_ms.saturating_mul(16),
        )
    }
}

/// Feed gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Maximum feed requests per second across all channels
    pub requests_per_second: u32,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Retries for a transient fetch failure
    pub max_retries: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            request_timeout_secs: 15,
            max_retries: 2,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/onair.db"),
        }
    }
}

/// Query API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the HTTP server to
    pub bind_address: SocketAddr,

    /// Enable permissive CORS
    pub enable_cors: bool,

    /// Trace every HTTP request
    pub enable_request_logging: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: false,
            enable_request_logging: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            tick_interval_secs: env_parse("ONAIR_TICK_INTERVAL_SECS")
                .unwrap_or(defaults.tick_interval_secs),
            horizon_secs: env_parse("ONAIR_HORIZON_SECS").unwrap_or(defaults.horizon_secs),
            retention_secs: env_parse("ONAIR_RETENTION_SECS").unwrap_or(defaults.retention_secs),
            trim_interval_secs: env_parse("ONAIR_TRIM_INTERVAL_SECS")
                .unwrap_or(defaults.trim_interval_secs),
            worker_pool_size: env_parse("ONAIR_WORKER_POOL_SIZE")
                .unwrap_or(defaults.worker_pool_size),
            starved_backoff_base_secs: env_parse("ONAIR_STARVED_BACKOFF_BASE_SECS")
                .unwrap_or(defaults.starved_backoff_base_secs),
            starved_backoff_max_secs: env_parse("ONAIR_STARVED_BACKOFF_MAX_SECS")
                .unwrap_or(defaults.starved_backoff_max_secs),
            write_max_retries: env_parse("ONAIR_WRITE_MAX_RETRIES")
                .unwrap_or(defaults.write_max_retries),
            write_retry_base_ms: env_parse("ONAIR_WRITE_RETRY_BASE_MS")
                .unwrap_or(defaults.write_retry_base_ms),
            shutdown_grace_secs: env_parse("ONAIR_SHUTDOWN_GRACE_SECS")
                .unwrap_or(defaults.shutdown_grace_secs),
        };

        let feed_defaults = FeedConfig::default();
        let feeds = FeedConfig {
            requests_per_second: env_parse("ONAIR_FEED_RPS")
                .unwrap_or(feed_defaults.requests_per_second),
            request_timeout_secs: env_parse("ONAIR_FEED_TIMEOUT_SECS")
                .unwrap_or(feed_defaults.request_timeout_secs),
            max_retries: env_parse("ONAIR_FEED_MAX_RETRIES").unwrap_or(feed_defaults.max_retries),
        };

        let sqlite_path = std::env::var("ONAIR_SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| DatabaseConfig::default().sqlite_path);

        let bind_address = match std::env::var("ONAIR_BIND_ADDRESS") {
            Ok(addr) => addr
                .parse()
                .with_context(|| format!("Invalid ONAIR_BIND_ADDRESS: {addr}"))?,
            Err(_) => ApiConfig::default().bind_address,
        };

        let level = std::env::var("ONAIR_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let format = std::env::var("ONAIR_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            scheduler,
            feeds,
            database: DatabaseConfig { sqlite_path },
            api: ApiConfig {
                bind_address,
                ..ApiConfig::default()
            },
            logging: LoggingConfig { level, format },
            channels: Vec::new(),
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be greater than 0");
        }
        if s.horizon_secs <= 0 || s.horizon_secs > MAX_HORIZON_SECS {
            anyhow::bail!("horizon_secs must be in 1..={MAX_HORIZON_SECS}");
        }
        if !(0..=MAX_RETENTION_SECS).contains(&s.retention_secs) {
            anyhow::bail!("retention_secs must be in 0..={MAX_RETENTION_SECS}");
        }
        if !(0..=MAX_RETENTION_SECS).contains(&s.trim_interval_secs) {
            anyhow::bail!("trim_interval_secs must be in 0..={MAX_RETENTION_SECS}");
        }
        if s.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be greater than 0");
        }
        if s.starved_backoff_base_secs == 0 {
            anyhow::bail!("starved_backoff_base_secs must be greater than 0");
        }
        if s.starved_backoff_max_secs < s.starved_backoff_base_secs {
            anyhow::bail!("starved_backoff_max_secs must be >= starved_backoff_base_secs");
        }
        if self.feeds.requests_per_second == 0 {
            anyhow::bail!("feeds.requests_per_second must be greater than 0");
        }

        for channel in &self.channels {
            if channel.feeds.is_empty() {
                anyhow::bail!("channel '{}' has no feeds", channel.id);
            }
            if let Some(secs) = channel.horizon_secs {
                if secs > MAX_HORIZON_SECS {
                    anyhow::bail!(
                        "channel '{}' horizon_secs must not exceed {MAX_HORIZON_SECS}",
                        channel.id
                    );
                }
            }
            for feed in &channel.feeds {
                url::Url::parse(feed).with_context(|| {
                    format!("channel '{}' has an invalid feed URL: {feed}", channel.id)
                })?;
            }
        }

        Ok(())
    }
}
