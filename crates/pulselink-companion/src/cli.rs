//! Command-line interface for the companion daemon.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use pulselink_core::{TracingConfig, TracingOutputFormat};

use crate::config::CompanionConfig;

/// pulselink-companion - relay watch readings to a remote API
#[derive(Debug, Parser)]
#[command(name = "pulselink-companion")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the Unix socket devices connect to
    #[arg(long, env = "PULSELINK_SOCKET")]
    pub socket_path: Option<PathBuf>,

    /// Settings file (TOML)
    #[arg(long, env = "PULSELINK_SETTINGS")]
    pub settings_path: Option<PathBuf>,

    /// Timeout for requests to the remote API, in seconds
    #[arg(long, default_value = "15")]
    pub http_timeout: u64,

    /// Maximum concurrent device connections
    #[arg(long, default_value = "16")]
    pub max_connections: usize,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for TracingOutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
            LogFormat::Json => Self::Json,
        }
    }
}

impl Cli {
    pub fn companion_config(&self) -> CompanionConfig {
        let mut config = CompanionConfig::default()
            .with_http_timeout(Duration::from_secs(self.http_timeout))
            .with_max_connections(self.max_connections);
        if let Some(ref path) = self.socket_path {
            config.socket_path = path.clone();
        }
        if let Some(ref path) = self.settings_path {
            config = config.with_settings_path(path);
        }
        config
    }

    pub fn tracing_config(&self) -> TracingConfig {
        let config = TracingConfig::daemon().with_format(self.log_format.into());
        if self.debug {
            config.with_level(tracing::Level::DEBUG)
        } else {
            config
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "pulselink-companion",
            "--socket-path",
            "/tmp/p.sock",
            "--settings-path",
            "/tmp/s.toml",
            "--http-timeout",
            "3",
            "--max-connections",
            "2",
        ])
        .unwrap();
        let config = cli.companion_config();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/p.sock"));
        assert_eq!(config.settings_path, PathBuf::from("/tmp/s.toml"));
        assert_eq!(config.http_timeout, Duration::from_secs(3));
        assert_eq!(config.max_connections, 2);
    }

    #[test]
    fn log_format_and_level() {
        let cli = Cli::try_parse_from(["pulselink-companion", "--log-format", "pretty", "-v"]).unwrap();
        let config = cli.tracing_config();
        assert_eq!(config.output_format, TracingOutputFormat::Pretty);
        assert_eq!(config.default_level, tracing::Level::DEBUG);

        let cli = Cli::try_parse_from(["pulselink-companion"]).unwrap();
        assert_eq!(cli.tracing_config().output_format, TracingOutputFormat::Json);
    }
}
