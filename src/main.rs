use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use onair::api::{ApiServer, AppState};
use onair::config::Config;
use onair::feed::HttpFeedSource;
use onair::models::{ChannelId, TenantId};
use onair::query::{channel_schedule, ScheduleWindow};
use onair::scheduler::Orchestrator;
use onair::storage::{ChannelStore, SqliteStore};
use onair::utils::format_duration;

#[derive(Parser)]
#[command(
    name = "onair",
    version,
    about = "MRSS-driven auto-scheduler for linear channels",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap all channels, then keep horizons filled and serve the query API
    Run,

    /// Run one forced reconciliation pass for every channel and exit
    Bootstrap,

    /// List channels
    Channels {
        /// Only channels of this tenant
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Print a channel's schedule
    Schedule {
        /// Channel id
        channel: String,

        /// UTC day (YYYY-MM-DD); includes expired events
        #[arg(short, long, conflicts_with_all = ["start", "end"])]
        date: Option<NaiveDate>,

        /// Range start (RFC 3339); includes expired events
        #[arg(long, requires = "end")]
        start: Option<DateTime<Utc>>,

        /// Range end (RFC 3339)
        #[arg(long, requires = "start")]
        end: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Run => {
            tracing::info!(
                horizon_secs = config.scheduler.horizon_secs,
                tick_interval_secs = config.scheduler.tick_interval_secs,
                "Starting run command"
            );
            run(config).await?;
        }

        Commands::Bootstrap => {
            tracing::info!("Starting bootstrap command");
            bootstrap(config).await?;
        }

        Commands::Channels { tenant } => {
            channels(config, tenant).await?;
        }

        Commands::Schedule {
            channel,
            date,
            start,
            end,
        } => {
            schedule(config, channel, date, start, end).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("onair=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("onair={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Open the store and import channels declared in the configuration
fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database.sqlite_path).with_context(|| {
        format!(
            "Failed to open database: {}",
            config.database.sqlite_path.display()
        )
    })?;

    for channel in &config.channels {
        store
            .upsert_channel(channel)
            .with_context(|| format!("Failed to import channel '{}'", channel.id))?;
    }
    if !config.channels.is_empty() {
        tracing::info!(channels = config.channels.len(), "Imported configured channels");
    }

    Ok(Arc::new(store))
}

fn build_orchestrator(config: &Config, store: &Arc<SqliteStore>) -> Result<Arc<Orchestrator>> {
    let feeds = Arc::new(HttpFeedSource::new(&config.feeds)?);
    Ok(Arc::new(Orchestrator::new(
        config.scheduler.clone(),
        store.clone(),
        feeds,
        store.clone(),
    )))
}

async fn run(config: Config) -> Result<()> {
    if let Err(e) = onair::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let store = open_store(&config)?;
    let orchestrator = build_orchestrator(&config, &store)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C");
        }
        let _ = shutdown_tx.send(true);
    });

    let state = AppState::new(
        store.clone(),
        store.clone(),
        orchestrator.clone(),
        config.scheduler.horizon(),
    );
    let server = ApiServer::new(config.api.clone(), state);
    let api_shutdown = wait_for_shutdown(shutdown_rx.clone());
    let api = tokio::spawn(async move { server.start_with_shutdown(api_shutdown).await });

    let scheduled = orchestrator.run(wait_for_shutdown(shutdown_rx)).await;

    match api.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Query API stopped with error"),
        Err(e) => tracing::error!(error = %e, "Query API task failed"),
    }

    scheduled.context("Scheduler stopped")?;
    tracing::info!("onair stopped");
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn bootstrap(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let orchestrator = build_orchestrator(&config, &store)?;

    orchestrator.bootstrap().await?;

    println!(
        "{:<24} {:<10} {:>10} {:<26} {}",
        "CHANNEL", "STATE", "SEQUENCE", "SCHEDULED UNTIL", "LAST ERROR"
    );
    for status in orchestrator.statuses().await {
        println!(
            "{:<24} {:<10} {:>10} {:<26} {}",
            status.channel_id,
            status.state,
            status.last_sequence,
            status
                .last_scheduled_end
                .map(|end| end.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
            status.last_error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn channels(config: Config, tenant: Option<String>) -> Result<()> {
    let store = open_store(&config)?;
    let channels = match tenant {
        Some(tenant) => store.list_by_tenant(&TenantId::new(tenant)).await?,
        None => store.list_all().await?,
    };

    println!(
        "{:<24} {:<16} {:<8} {:>6} NAME",
        "CHANNEL", "TENANT", "TYPE", "FEEDS"
    );
    for channel in channels {
        println!(
            "{:<24} {:<16} {:<8} {:>6} {}",
            channel.id,
            channel.tenant_id,
            channel.channel_type,
            channel.feeds.len(),
            channel.name
        );
    }
    Ok(())
}

async fn schedule(
    config: Config,
    channel: String,
    date: Option<NaiveDate>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<()> {
    let store = open_store(&config)?;
    let window = ScheduleWindow::from_params(date, start, end).map_err(anyhow::Error::msg)?;
    let channel_id = ChannelId::new(channel);

    let Some(schedule) = channel_schedule(
        store.as_ref(),
        store.as_ref(),
        &channel_id,
        window,
        Utc::now(),
        config.scheduler.horizon(),
    )
    .await?
    else {
        anyhow::bail!("Channel not found: {channel_id}");
    };

    println!(
        "{} ({}) {} .. {}",
        schedule.channel.name,
        schedule.channel.id,
        schedule.range.start.to_rfc3339(),
        schedule.range.end.to_rfc3339()
    );
    println!(
        "{:>8} {:<20} {:<20} {:>8} {:<8} {:>4} TITLE",
        "SEQ", "START", "END", "LENGTH", "STATUS", "LOOP"
    );
    for event in &schedule.events {
        println!(
            "{:>8} {:<20} {:<20} {:>8} {:<8} {:>4} {}",
            event.sequence,
            event.start.format("%Y-%m-%d %H:%M:%S"),
            event.end.format("%Y-%m-%d %H:%M:%S"),
            format_duration(event.duration()),
            event.status.as_str(),
            event.loop_pass,
            event.title
        );
    }
    if schedule.events.is_empty() {
        println!("(no events)");
    }
    Ok(())
}
