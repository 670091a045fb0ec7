//! queuewatch - durable task queue and dispatcher
//!
//! Main entry point for the queuewatch CLI.

mod cli;
mod handlers;
mod signal;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use queuewatch_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};
use queuewatch_queue::{Dispatcher, Producer, QueueStore, SqliteQueueStore};

use cli::{Cli, Commands};

fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // Console output goes to stderr so `enqueue` and `stats` keep stdout clean.
    let console = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    let file = if config.file {
        let log_dir = config.resolved_directory();
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("queuewatch")
            .filename_suffix("log")
            .max_log_files(30)
            .build(&log_dir)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Keep the guard alive for the program duration.
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load_or_default(cli.config.as_deref())?;
    init_tracing(&config.logging)?;

    if let Some(db) = cli.db {
        config.store.path = db;
    }

    match cli.command {
        Commands::Run {
            poll_interval_ms,
            claimant,
        } => {
            if let Some(ms) = poll_interval_ms {
                config.dispatcher.poll_interval_ms = ms;
            }
            if let Some(claimant) = claimant {
                config.dispatcher.claimant = claimant;
            }
            run_dispatcher(config).await
        }
        Commands::Enqueue { kind, data } => enqueue(config, &kind, &data).await,
        Commands::Stats { json } => show_stats(config, json).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<SqliteQueueStore>, Box<dyn std::error::Error>> {
    let store = SqliteQueueStore::open(&config.store)
        .await?
        .with_retry(config.retry.clone());
    Ok(Arc::new(store))
}

/// Run the dispatcher in the foreground.
async fn run_dispatcher(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting queuewatch v{}", env!("CARGO_PKG_VERSION"));

    let validation = ConfigValidator::validate(&config)?;
    for warning in &validation.warnings {
        warn!(path = %warning.path, "{}", warning.message);
    }
    if !validation.is_valid() {
        for err in &validation.errors {
            error!("Invalid configuration: {}", err);
        }
        return Err(format!(
            "invalid configuration ({} error(s))",
            validation.errors.len()
        )
        .into());
    }

    let store = open_store(&config).await?;
    let registry = Arc::new(handlers::build_registry(&config.handlers)?);
    info!("Registered handlers: {:?}", registry.kinds());

    let shutdown = CancellationToken::new();
    signal::install(shutdown.clone())?;

    let dispatcher = Dispatcher::new(store, registry, config.dispatcher.clone());
    dispatcher.run(shutdown).await?;

    let stats = dispatcher.stats();
    info!(
        completed = stats.completed,
        acknowledged = stats.acknowledged,
        requeued = stats.requeued,
        dead_lettered = stats.dead_lettered,
        "queuewatch stopped"
    );
    Ok(())
}

async fn enqueue(config: Config, kind: &str, data: &str) -> Result<(), Box<dyn std::error::Error>> {
    let data: serde_json::Value =
        serde_json::from_str(data).map_err(|e| format!("--data is not valid JSON: {}", e))?;

    let store = open_store(&config).await?;
    let id = Producer::new("cli", store).submit(kind, data).await?;
    println!("{}", id);
    Ok(())
}

async fn show_stats(config: Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&config).await?;
    let stats = store.stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{:<10} {}", "pending", stats.pending);
        println!("{:<10} {}", "claimed", stats.claimed);
        println!("{:<10} {}", "processed", stats.processed);
        println!("{:<10} {}", "failed", stats.failed);
        println!("{:<10} {}", "total", stats.total());
    }
    Ok(())
}
