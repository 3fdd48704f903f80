//! pulselink-companion daemon entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use pulselink_core::init_tracing;

use pulselink_companion::cli::Cli;
use pulselink_companion::{
    CompanionEndpoint, CompanionError, CompanionResult, FileSettingsStore, HttpPushClient,
    SettingsManager, SignalHandler, SocketServer, SyncService, spawn_settings_fanout,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.tracing_config()) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Companion stopped");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CompanionResult<()> {
    let config = cli.companion_config();

    let settings = SettingsManager::load(FileSettingsStore::new(&config.settings_path))?;
    let push = HttpPushClient::new(config.http_timeout)
        .map_err(|e| CompanionError::config(e.to_string()))?;
    let service = SyncService::new(Arc::new(push), settings.clone());
    let endpoint = CompanionEndpoint::new(service.registry());
    info!(methods = ?endpoint.registry().methods(), "Handlers registered");

    let fanout = spawn_settings_fanout(settings.clone(), endpoint.clone());

    let signals = SignalHandler::new();
    signals.spawn_listener()?;
    let mut reloads = signals.reloads();
    let reloader = tokio::spawn(async move {
        while reloads.changed().await.is_ok() {
            match settings.reload() {
                Ok(true) => {}
                Ok(false) => info!("Settings unchanged after reload"),
                Err(e) => warn!(error = %e, "Failed to reload settings"),
            }
        }
    });

    let server = SocketServer::new(config).await?;
    let result = server
        .run_until_shutdown(endpoint, signals.wait_for_shutdown())
        .await;

    fanout.abort();
    reloader.abort();
    info!("Companion shut down");
    result
}
