//! Companion configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Companion configuration.
#[derive(Debug, Clone)]
pub struct CompanionConfig {
    /// Path to the Unix socket.
    pub socket_path: PathBuf,

    /// Maximum concurrent device connections.
    pub max_connections: usize,

    /// Whether to remove stale socket on startup.
    pub cleanup_stale_socket: bool,

    /// Timeout for requests to the remote endpoint.
    pub http_timeout: Duration,

    /// Where settings are persisted.
    pub settings_path: PathBuf,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            max_connections: 16,
            cleanup_stale_socket: true,
            http_timeout: Duration::from_secs(15),
            settings_path: default_settings_path(),
        }
    }
}

impl CompanionConfig {
    /// Creates a configuration with the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    /// Builder: set max connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder: set cleanup stale socket.
    pub fn with_cleanup_stale_socket(mut self, cleanup: bool) -> Self {
        self.cleanup_stale_socket = cleanup;
        self
    }

    /// Builder: set HTTP timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Builder: set settings file path.
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = path.into();
        self
    }
}

/// Returns the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/pulselink.sock` if available,
/// otherwise falls back to `/tmp/pulselink-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("pulselink.sock")
    } else {
        #[cfg(unix)]
        let uid = unsafe { libc::getuid() };
        #[cfg(not(unix))]
        let uid = 0;
        PathBuf::from(format!("/tmp/pulselink-{}.sock", uid))
    }
}

/// Returns the default settings file path.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pulselink")
        .join("settings.toml")
}
