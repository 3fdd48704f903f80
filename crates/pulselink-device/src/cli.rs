//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// pulselink-device - talk to a pulselink companion like a watch would
#[derive(Debug, Parser)]
#[command(name = "pulselink-device")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the companion socket
    #[arg(long, env = "PULSELINK_SOCKET")]
    pub socket_path: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// Device identifier attached to readings
    #[arg(long, env = "PULSELINK_DEVICE_ID")]
    pub device_id: Option<String>,

    /// Fall back to an in-process simulated companion when the socket is unreachable
    #[arg(long)]
    pub simulate: bool,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one heart-rate reading
    HeartRate {
        /// Beats per minute (1-199)
        bpm: u16,
    },

    /// Send one location fix
    Location {
        /// Latitude in decimal degrees
        #[arg(allow_hyphen_values = true)]
        latitude: f64,
        /// Longitude in decimal degrees
        #[arg(allow_hyphen_values = true)]
        longitude: f64,
    },

    /// Send whatever readings are given, each optional
    Sync {
        /// Heart rate in bpm
        #[arg(long)]
        heart_rate: Option<u16>,
        /// Latitude in decimal degrees
        #[arg(long, requires = "longitude", allow_hyphen_values = true)]
        latitude: Option<f64>,
        /// Longitude in decimal degrees
        #[arg(long, requires = "latitude", allow_hyphen_values = true)]
        longitude: Option<f64>,
    },

    /// Ask the companion to probe the remote endpoint
    TestConnection {
        /// Probe this URL instead of the configured endpoint
        #[arg(long)]
        url: Option<String>,
    },

    /// Send arbitrary JSON test data through the companion
    TestData {
        /// JSON object to send
        json: String,
    },

    /// Ask the companion whether the remote endpoint is reachable
    CheckNetwork,

    /// Settings commands
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Read sensor lines from stdin and sync them as they change
    ///
    /// Accepted lines: `hr <bpm>` and `loc <lat> <lng> [A|V]`.
    Monitor,
}

/// Settings actions.
#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Show the companion's settings
    Get,

    /// Update the companion's settings
    Set {
        /// Remote endpoint URL
        #[arg(long)]
        endpoint: Option<String>,
        /// Bearer token
        #[arg(long)]
        token: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_negative_coordinates() {
        let cli = Cli::try_parse_from(["pulselink-device", "location", "-33.86", "151.21"]).unwrap();
        match cli.command {
            Command::Location {
                latitude,
                longitude,
            } => {
                assert_eq!(latitude, -33.86);
                assert_eq!(longitude, 151.21);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.timeout, 10);
        assert!(!cli.simulate);
    }

    #[test]
    fn sync_requires_both_coordinates() {
        let result = Cli::try_parse_from(["pulselink-device", "sync", "--latitude", "1.0"]);
        assert!(result.is_err());
    }
}
