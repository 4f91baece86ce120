mod orchestrator;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracewarden_core::config::WatchdogConfig;
use tracewarden_doctor::{HealthAggregator, HealthStatus};
use tracewarden_watchman::Watchdog;

use crate::orchestrator::CommandOrchestrator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tracewarden - trace file watchdog", long_about = None)]
struct Args {
    /// Config file to use instead of ./tracewarden.{toml,json,yaml}
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the configured directories until Ctrl-C
    Run,
    /// Validate configuration and probe the directories
    Check,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let command = args.command.unwrap_or(Commands::Run);
    let _guard = match command {
        Commands::Run => init_run_logging(level),
        Commands::Check | Commands::Config => {
            // stdout is reserved for JSON
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_max_level(level)
                .init();
            None
        }
    };

    tracewarden_core::init();

    let config = load_config(args.config.as_deref())?;

    match command {
        Commands::Run => run(config).await,
        Commands::Check => check(&config).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// stdout plus an append-mode `{app_root}/tracewarden.log`.
fn init_run_logging(level: LevelFilter) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let app_root = tracewarden_core::path_utils::get_app_root();
    let file = std::fs::create_dir_all(&app_root).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(app_root.join("tracewarden.log"))
    });

    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
    match file {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .with(level)
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(level)
                .init();
            warn!(error = %e, "Log file unavailable, logging to stdout only");
            None
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<WatchdogConfig> {
    match path {
        Some(path) => WatchdogConfig::load_from(path)
            .with_context(|| format!("Invalid configuration in {}", path.display())),
        None => WatchdogConfig::load().context("Invalid configuration"),
    }
}

async fn run(config: WatchdogConfig) -> anyhow::Result<()> {
    let command = match config.orchestrator_command.as_deref().map(str::trim) {
        Some(command) if !command.is_empty() => command.to_string(),
        _ if !config.enabled => String::new(),
        _ => bail!("orchestrator_command is not set (TRACEWARDEN_ORCHESTRATOR_COMMAND)"),
    };

    let report_every = config.health_cache_duration().max(Duration::from_secs(1));
    let watchdog = Arc::new(Watchdog::new(
        config,
        Arc::new(CommandOrchestrator::new(command)),
    ));
    watchdog.start().await.context("Failed to start watchdog")?;

    let health = HealthAggregator::new(watchdog.clone());
    let mut ticker = tokio::time::interval(report_every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = health.check_health().await;
                match report.status {
                    HealthStatus::Healthy => info!("🩺 {}", report.summary()),
                    HealthStatus::Degraded => warn!("🩺 {}", report.summary()),
                    HealthStatus::Unhealthy => error!("🩺 {}", report.summary()),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Cannot listen for Ctrl-C, shutting down");
                }
                break;
            }
        }
    }

    watchdog.stop().await?;
    let status = watchdog.status();
    info!(
        processed = status.processed_count,
        succeeded = status.success_count,
        failed = status.failure_count,
        dropped = status.dropped_count,
        "👋 Goodbye"
    );
    Ok(())
}

async fn check(config: &WatchdogConfig) -> anyhow::Result<()> {
    let probes = tracewarden_doctor::probe_directories(config).await;
    let orchestrator_configured = config
        .orchestrator_command
        .as_deref()
        .is_some_and(|c| !c.trim().is_empty());

    let report = json!({
        "config_valid": true,
        "enabled": config.enabled,
        "watched_directories": config.watched_directories(),
        "extensions": config.extensions(),
        "orchestrator_configured": orchestrator_configured,
        "input": probes.input,
        "archive": probes.archive,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !probes.input.ok || !probes.archive.ok {
        bail!("Directory probes failed");
    }
    if config.enabled && !orchestrator_configured {
        bail!("orchestrator_command is not set");
    }
    Ok(())
}
