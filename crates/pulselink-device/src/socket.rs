//! Unix socket transport to a companion daemon.

use std::path::{Path, PathBuf};

use tokio::net::UnixStream;
use tracing::debug;

use pulselink_protocol::{ConnectFuture, Transport, TransportError, bridge_stream};

/// Connects to the companion over its Unix socket.
#[derive(Debug, Clone)]
pub struct UnixSocketTransport {
    socket_path: PathBuf,
}

impl UnixSocketTransport {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Checks if the companion socket exists.
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }
}

impl Transport for UnixSocketTransport {
    fn connect(&self) -> ConnectFuture {
        let path = self.socket_path.clone();
        Box::pin(async move {
            debug!(socket = %path.display(), "Connecting to companion");
            let stream = UnixStream::connect(&path).await.map_err(|e| {
                TransportError::connect(format!("failed to connect to {}: {}", path.display(), e))
            })?;
            Ok(bridge_stream(stream))
        })
    }

    fn name(&self) -> &str {
        "unix"
    }
}
