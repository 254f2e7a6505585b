pub mod cli;
pub mod config;
pub mod output;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::{load_config, WatchConfig};
use entity_events_connector::{ConnectionEvent, ConnectionManager, UpdateFeed};
use std::sync::Arc;
use tokio::{signal, sync::broadcast};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

/// The main entry point for running the watch application logic.
/// This function handles CLI parsing, configuration, and the event loop.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let Commands::Run(run_cmd) = cli.command;
    let config = load_config_from_cli(&run_cmd)?;
    entity_events_logger::init(&config.watch.log)?;
    tracing::info!("Configuration loaded: {:#?}", &config);
    run_watch(config).await?;

    Ok(())
}

/// Loads the configuration named on the command line and applies the
/// command-line overrides on top of it.
pub fn load_config_from_cli(run_cmd: &cli::RunCmd) -> Result<WatchConfig> {
    let mut config = load_config(run_cmd.config.as_deref())?;
    config.watch.apply_overrides(run_cmd);
    Ok(config)
}

/// Connects, prints every update until Ctrl+C or until reconnection gives up,
/// then shuts the connection down.
async fn run_watch(config: WatchConfig) -> Result<()> {
    let policy = config.watch.update_policy()?;
    let (manager, handle) = ConnectionManager::websocket(Arc::new(config.connector.clone()));
    let manager_task = tokio::spawn(manager.run());
    let lifecycle = tokio::spawn(watch_lifecycle(handle.events()));

    let feed = UpdateFeed::attach(handle.clone(), policy, output::print_update)?;
    handle
        .connect(config.watch.credentials())
        .await
        .context("Failed to connect to the event source")?;
    tracing::info!("Watching {:?}", feed.policy().event_types);

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown..."),
            Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal."),
        },
        _ = lifecycle => tracing::warn!("Event source unreachable, giving up."),
    }

    drop(feed);
    handle.disconnect().await;
    handle.shutdown().await;
    manager_task.await??;
    tracing::info!("Shutdown complete.");
    Ok(())
}

/// Logs lifecycle events. Returns once reconnection has been abandoned.
async fn watch_lifecycle(events: broadcast::Receiver<ConnectionEvent>) {
    let mut events = BroadcastStream::new(events);
    while let Some(event) = events.next().await {
        match event {
            Ok(ConnectionEvent::Connected) => tracing::info!("Connected"),
            Ok(ConnectionEvent::Disconnected {
                code,
                reason,
                was_clean,
            }) => tracing::info!(code, was_clean, "Disconnected: {}", reason),
            Ok(ConnectionEvent::Reconnecting { attempt, delay }) => {
                tracing::info!("Reconnecting in {:?} (attempt {})", delay, attempt)
            }
            Ok(ConnectionEvent::MaxReconnectAttemptsReached { attempts }) => {
                tracing::error!("Gave up after {} reconnect attempts", attempts);
                return;
            }
            Ok(ConnectionEvent::Error { message }) => tracing::warn!("Connection error: {}", message),
            Err(lagged) => tracing::warn!("Lifecycle events dropped: {}", lagged),
        }
    }
}
