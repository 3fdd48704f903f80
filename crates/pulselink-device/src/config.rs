//! Device configuration.

use std::path::PathBuf;
use std::time::Duration;

use pulselink_companion::default_socket_path;

/// Device endpoint configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Path to the companion's Unix socket.
    pub socket_path: PathBuf,

    /// How long a request waits for its response.
    pub request_timeout: Duration,

    /// How long a transport may take to connect.
    pub connect_timeout: Duration,

    /// Identifier attached to outgoing readings.
    pub device_id: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            device_id: None,
        }
    }
}

impl DeviceConfig {
    /// Creates a configuration targeting the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    /// Builder: set request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder: set connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set device id.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}
