//! pulselink-device CLI entry point.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde_json::{Value, json};

use pulselink_core::{LocationFix, SettingsPatch, TracingConfig, init_tracing};
use pulselink_protocol::methods;

use pulselink_device::cli::{Cli, Command, SettingsAction};
use pulselink_device::monitor::pump_lines;
use pulselink_device::{
    DeviceConfig, DeviceEndpoint, DeviceError, DeviceResult, HeartRateFeed, LocationFeed,
    SyncAgent, UnixSocketTransport,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(TracingConfig::cli(cli.debug)) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> DeviceResult<()> {
    let mut config = DeviceConfig::default().with_request_timeout(Duration::from_secs(cli.timeout));
    if let Some(path) = cli.socket_path {
        config.socket_path = path;
    }
    if let Some(device_id) = cli.device_id {
        config = config.with_device_id(device_id);
    }

    let mut builder =
        DeviceEndpoint::builder(UnixSocketTransport::new(&config.socket_path)).with_config(config);
    if cli.simulate {
        builder = builder.with_fallback(pulselink_companion::spawn_simulated_companion());
    }
    let endpoint = builder.build();

    let heart_rate = HeartRateFeed::default();
    let location = LocationFeed::default();
    let agent = SyncAgent::new(endpoint.clone(), heart_rate.clone(), location.clone());

    match cli.command {
        Command::HeartRate { bpm } => print(agent.sync_heart_rate(bpm).await?),
        Command::Location {
            latitude,
            longitude,
        } => print(
            agent
                .sync_location(LocationFix::valid(latitude, longitude))
                .await?,
        ),
        Command::Sync {
            heart_rate: bpm,
            latitude,
            longitude,
        } => {
            if let Some(bpm) = bpm {
                heart_rate.record(bpm);
            }
            if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
                location.record(LocationFix::valid(latitude, longitude));
            }
            print(agent.manual_sync().await?)
        }
        Command::TestConnection { url } => {
            let params = match url {
                Some(url) => json!({ "apiUrl": url }),
                None => json!({}),
            };
            print(endpoint.request(methods::TEST_CONNECTION, params).await?)
        }
        Command::TestData { json } => {
            let params: Value = serde_json::from_str(&json)
                .map_err(|e| DeviceError::invalid_reading(format!("invalid JSON: {}", e)))?;
            print(endpoint.request(methods::TEST_DATA_SEND, params).await?)
        }
        Command::CheckNetwork => print(endpoint.request(methods::CHECK_NETWORK, json!({})).await?),
        Command::Settings { action } => match action {
            SettingsAction::Get => {
                let settings = agent.fetch_settings().await?;
                print(json!({ "settings": settings.redacted() }))
            }
            SettingsAction::Set { endpoint: api, token } => {
                let patch = SettingsPatch {
                    api_endpoint: api,
                    auth_token: token,
                };
                let params = serde_json::to_value(&patch)
                    .map_err(|e| DeviceError::Protocol(e.to_string()))?;
                endpoint.request(methods::UPDATE_SETTINGS, params).await?;
                println!("settings updated");
                Ok(())
            }
        },
        Command::Monitor => {
            monitor(agent, heart_rate, location).await;
            Ok(())
        }
    }
}

async fn monitor(agent: SyncAgent, heart_rate: HeartRateFeed, location: LocationFeed) {
    let mut status = agent.subscribe_status();
    let printer = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            println!("status: {}", *status.borrow_and_update());
        }
    });

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    // Keeps running after stdin closes so companion pushes still show up.
    let feed = async {
        let accepted = pump_lines(input, &heart_rate, &location).await;
        tracing::info!(accepted, "Sensor input closed");
        std::future::pending::<()>().await
    };
    agent
        .run_auto_sync(async {
            tokio::select! {
                _ = feed => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        })
        .await;

    agent.endpoint().disconnect();
    printer.abort();
}

fn print(value: Value) -> DeviceResult<()> {
    let text =
        serde_json::to_string_pretty(&value).map_err(|e| DeviceError::Protocol(e.to_string()))?;
    println!("{}", text);
    Ok(())
}
