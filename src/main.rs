//! Entry point: loads configuration, wires up the store, server and
//! collector framework, and runs until Ctrl+C (spec.md §1, §6, §8).

mod analyzer;
mod cli;
mod collectors;
mod config;
mod model;
mod server;
mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use analyzer::AnalyzerConfig;
use cli::{Cli, Commands};
use config::Config;
use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { project_type, name, force }) => {
            return cli::run_init(project_type, name, force);
        }
        Some(Commands::Migrate { from_db, to_db, force }) => {
            return cli::run_migrate(&from_db, &to_db, force);
        }
        Some(Commands::Status) => {
            return cli::run_status(cli.config.as_ref()).await;
        }
        Some(Commands::Logs { source, level, since, search, limit, verbose }) => {
            return cli::run_logs(cli.config.as_ref(), source, level, since, search, limit, verbose).await;
        }
        Some(Commands::Daemon) => {
            cli::write_pidfile()?;
        }
        Some(Commands::Server) => {
            let config = Config::load(cli.config.as_ref());
            init_tracing(&config);
            return run_server_only(config).await;
        }
        Some(Commands::Collectors) => {
            let config = Config::load(cli.config.as_ref());
            init_tracing(&config);
            return run_collectors_only(config).await;
        }
        // `start`, or no subcommand at all: run the full daemon.
        Some(Commands::Start) | None => {}
    }

    let config = Config::load(cli.config.as_ref());
    init_tracing(&config);

    tracing::info!(project = %config.project_name, "starting log-collector");

    run_full(config).await
}

/// Precedence: RUST_LOG env var > config.logging.level > "info". Mirrors
/// the ordering the rest of Config::load already applies to every other
/// setting; optionally tees to a rotating file if configured.
fn init_tracing(config: &Config) {
    let default_filter = format!(
        "log_collector={},tower_http=debug,axum=debug",
        config.logging.level
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if config.logging.file_enabled {
        let rotation = match config.logging.file_rotation {
            config::LogRotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
            config::LogRotation::Never => tracing_appender::rolling::Rotation::NEVER,
            config::LogRotation::Daily => tracing_appender::rolling::Rotation::DAILY,
        };
        let appender = tracing_appender::rolling::RollingFileAppender::new(
            rotation,
            &config.logging.file_dir,
            &config.logging.file_prefix,
        );
        // Leaked intentionally: the non-blocking worker guard must outlive
        // every tracing call for the life of the process.
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        Box::leak(Box::new(guard));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Translates the resolved `[alerts]` config section into the analyzer's
/// own config type, so `error_spike_threshold`/`error_spike_window_secs`/
/// `slow_response_multiplier` actually reach the sliding-window signals
/// instead of being silently dropped on the floor.
fn analyzer_config(config: &Config) -> AnalyzerConfig {
    AnalyzerConfig {
        error_spike_threshold: config.alerts.error_spike_threshold,
        error_spike_window_secs: config.alerts.error_spike_window_secs,
        slow_response_multiplier: config.alerts.slow_response_multiplier,
    }
}

/// `127.0.0.1`-resolved RPC URL collectors post their own batches to,
/// regardless of whether the server is bound to a wildcard address.
fn local_rpc_url(config: &Config) -> String {
    format!("http://127.0.0.1:{}/rpc", config.server.port)
}

async fn run_full(config: Config) -> Result<()> {
    let (store, stream_rx) = Store::open(config.storage.clone(), analyzer_config(&config))
        .context("opening store")?;
    let store = Arc::new(store);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let rpc_url = local_rpc_url(&config);

    let server_store = store.clone();
    let server_config = config.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::start_server(server_config, server_store, stream_rx, shutdown_rx).await {
            tracing::error!("server error: {e:?}");
        }
    });

    let collectors = collectors::CollectorManager::start(&config.collectors, &rpc_url);

    tracing::info!("log-collector running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down...");

    // Collectors stop first so no further writes race the store's close.
    collectors.shutdown().await;
    let _ = shutdown_tx.send(());
    let _ = server_handle.await;
    store.close().await.context("closing store")?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn run_server_only(config: Config) -> Result<()> {
    let (store, stream_rx) = Store::open(config.storage.clone(), analyzer_config(&config))
        .context("opening store")?;
    let store = Arc::new(store);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let server_store = store.clone();
    let server_config = config.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::start_server(server_config, server_store, stream_rx, shutdown_rx).await {
            tracing::error!("server error: {e:?}");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    let _ = shutdown_tx.send(());
    let _ = server_handle.await;
    store.close().await.context("closing store")?;
    Ok(())
}

async fn run_collectors_only(config: Config) -> Result<()> {
    let rpc_url = local_rpc_url(&config);
    let collectors = collectors::CollectorManager::start(&config.collectors, &rpc_url);
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    collectors.shutdown().await;
    Ok(())
}
