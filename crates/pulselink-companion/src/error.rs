//! Companion error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for companion operations.
pub type CompanionResult<T> = Result<T, CompanionError>;

/// Errors that can occur in the companion.
#[derive(Debug, Error)]
pub enum CompanionError {
    /// IO error (socket, file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, encoding, etc.).
    #[error("Protocol error: {0}")]
    Protocol(#[from] pulselink_protocol::ProtocolError),

    /// Socket path already in use.
    #[error("Socket path already in use: {path}")]
    SocketInUse { path: String },

    /// Socket path parent directory does not exist.
    #[error("Socket path parent directory does not exist: {path}")]
    SocketPathInvalid { path: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Settings could not be loaded or saved.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl CompanionError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a socket in use error.
    pub fn socket_in_use(path: impl Into<String>) -> Self {
        Self::SocketInUse { path: path.into() }
    }

    /// Creates a socket path invalid error.
    pub fn socket_path_invalid(path: impl Into<String>) -> Self {
        Self::SocketPathInvalid { path: path.into() }
    }
}

/// Result type for remote push operations.
pub type PushResult<T> = Result<T, PushError>;

/// Errors from pushing to the remote HTTP endpoint.
#[derive(Debug, Clone, Error)]
pub enum PushError {
    /// The endpoint answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The request did not complete (DNS, connect, TLS, timeout).
    #[error("network error: {0}")]
    Network(String),
}

impl PushError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// HTTP status, when the endpoint answered at all.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for settings persistence.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Errors from the settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_error_display() {
        let err = PushError::status(401, "bad token");
        assert_eq!(err.to_string(), "HTTP 401: bad token");
        assert_eq!(err.http_status(), Some(401));
        assert_eq!(PushError::network("refused").http_status(), None);
    }

    #[test]
    fn companion_error_helpers() {
        let err = CompanionError::socket_in_use("/tmp/x.sock");
        assert_eq!(err.to_string(), "Socket path already in use: /tmp/x.sock");
        let err = CompanionError::config("bad");
        assert_eq!(err.to_string(), "Configuration error: bad");
    }
}
