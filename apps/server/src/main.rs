//! Encore Server - console harness for the Encore playback engine.
//!
//! Runs the full orchestrator against a local `ffplay` audio output so queues,
//! retries, skips and idle auto-disconnect can be exercised from a terminal
//! without a chat platform.

mod config;
mod console;
mod ffplay;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use encore_core::{
    bootstrap_services, HttpMediaSource, LoggingStatusReporter, MediaSource, TokioSpawner,
    VoiceTransport, YtDlpSource,
};
use tokio::io::BufReader;
use tokio::signal;

use crate::config::{MediaBackend, ServerConfig};
use crate::console::Console;
use crate::ffplay::FfplayTransport;

/// Encore Server - drive the playback engine from a terminal.
#[derive(Parser, Debug)]
#[command(name = "encore-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "warn", env = "ENCORE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Media backend (overrides config file).
    #[arg(short, long, value_enum)]
    backend: Option<MediaBackend>,

    /// Retries before a request is skipped (overrides config file).
    #[arg(short = 'r', long)]
    max_retries: Option<u32>,

    /// Also log every status event (visible at debug level).
    #[arg(long)]
    log_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Encore Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }

    log::info!(
        "Configuration: backend={:?}, max_retries={}, volume={}",
        config.backend,
        config.max_retries,
        config.default_volume
    );

    let spawner = TokioSpawner::current();
    let media: Arc<dyn MediaSource> = match config.backend {
        MediaBackend::Ytdlp => Arc::new(YtDlpSource::new(&config.ytdlp_path, spawner.clone())),
        MediaBackend::Http => {
            Arc::new(HttpMediaSource::new().context("Failed to build HTTP client")?)
        }
    };
    let transport = Arc::new(FfplayTransport::new(&config.ffplay_path, spawner));

    // Bootstrap services
    let core_config = config.to_core_config();
    let services = bootstrap_services(
        &core_config,
        Arc::clone(&transport) as Arc<dyn VoiceTransport>,
        media,
    )
    .context("Failed to bootstrap services")?;

    if args.log_events {
        services
            .event_bridge
            .set_external_reporter(Arc::new(LoggingStatusReporter));
    }

    log::info!("Services bootstrapped successfully");

    let printer = tokio::spawn(console::print_events(services.event_bridge.subscribe()));

    let mut console = Console::new(services.clone(), transport);
    tokio::select! {
        result = console.run(BufReader::new(tokio::io::stdin())) => {
            result.context("Failed to read console input")?;
        }
        () = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
        }
    }

    // Graceful shutdown
    services.shutdown().await;

    printer.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
