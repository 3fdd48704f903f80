//! Unix socket listener that devices connect to.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use pulselink_protocol::bridge_stream;

use crate::config::CompanionConfig;
use crate::endpoint::CompanionEndpoint;
use crate::error::{CompanionError, CompanionResult};

/// Unix socket server feeding device connections to a [`CompanionEndpoint`].
pub struct SocketServer {
    config: CompanionConfig,
    listener: UnixListener,
    /// Limits concurrent device sessions.
    connection_semaphore: Arc<Semaphore>,
}

impl SocketServer {
    /// Binds the configured socket path.
    ///
    /// If `cleanup_stale_socket` is set, a leftover socket file nobody is
    /// listening on is removed first. A live socket is never touched.
    pub async fn new(config: CompanionConfig) -> CompanionResult<Self> {
        let socket_path = &config.socket_path;

        if let Some(parent) = socket_path.parent()
            && !parent.exists()
        {
            return Err(CompanionError::socket_path_invalid(
                parent.to_string_lossy().to_string(),
            ));
        }

        if config.cleanup_stale_socket && socket_path.exists() {
            match UnixStream::connect(socket_path).await {
                Ok(_) => {
                    return Err(CompanionError::socket_in_use(
                        socket_path.to_string_lossy().to_string(),
                    ));
                }
                Err(_) => {
                    info!(path = %socket_path.display(), "Removing stale socket");
                    std::fs::remove_file(socket_path)?;
                }
            }
        } else if socket_path.exists() {
            return Err(CompanionError::socket_in_use(
                socket_path.to_string_lossy().to_string(),
            ));
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "Companion listening");

        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

        Ok(Self {
            config,
            listener,
            connection_semaphore,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Waits for a free slot, then accepts one stream.
    pub async fn accept(&self) -> CompanionResult<(UnixStream, OwnedSemaphorePermit)> {
        let permit = self
            .connection_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| io::Error::other("connection limiter closed"))?;
        let (stream, _addr) = self.listener.accept().await?;
        debug!("Accepted device connection");
        Ok((stream, permit))
    }

    /// Accepts forever, serving each stream as one session.
    pub async fn run(&self, endpoint: CompanionEndpoint) -> CompanionResult<()> {
        loop {
            match self.accept().await {
                Ok((stream, permit)) => {
                    let endpoint = endpoint.clone();
                    tokio::spawn(async move {
                        endpoint.serve(bridge_stream(stream)).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Like [`run`](Self::run), but returns once `shutdown` completes.
    pub async fn run_until_shutdown<S>(
        &self,
        endpoint: CompanionEndpoint,
        shutdown: S,
    ) -> CompanionResult<()>
    where
        S: std::future::Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run(endpoint) => result,
            _ = shutdown => {
                info!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!(
                    path = %self.config.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            } else {
                debug!(path = %self.config.socket_path.display(), "Removed socket file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerRegistry;
    use pulselink_protocol::{ErrorDescriptor, Message, Outcome, decode, encode, read_frame, write_frame};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn creates_and_removes_socket_file() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let server = SocketServer::new(CompanionConfig::new(&socket_path)).await.unwrap();
        assert!(socket_path.exists());
        assert_eq!(server.socket_path(), socket_path);
        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn rejects_live_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let _server = SocketServer::new(CompanionConfig::new(&socket_path)).await.unwrap();
        let result = SocketServer::new(CompanionConfig::new(&socket_path)).await;
        assert!(matches!(result, Err(CompanionError::SocketInUse { .. })));

        let no_cleanup = CompanionConfig::new(&socket_path).with_cleanup_stale_socket(false);
        let result = SocketServer::new(no_cleanup).await;
        assert!(matches!(result, Err(CompanionError::SocketInUse { .. })));
    }

    #[tokio::test]
    async fn cleans_stale_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let _server = SocketServer::new(CompanionConfig::new(&socket_path)).await.unwrap();
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn missing_parent_directory_is_invalid() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("missing/test.sock");
        let result = SocketServer::new(CompanionConfig::new(&socket_path)).await;
        assert!(matches!(result, Err(CompanionError::SocketPathInvalid { .. })));
    }

    #[tokio::test]
    async fn serves_requests_over_the_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut registry = HandlerRegistry::new();
        registry.register("PING", |_| async { Ok::<_, ErrorDescriptor>(json!("pong")) });
        let endpoint = CompanionEndpoint::new(registry);

        let server = SocketServer::new(CompanionConfig::new(&socket_path)).await.unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(async move {
            server
                .run_until_shutdown(endpoint, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let request = encode(&Message::request(1, "PING", json!({}))).unwrap();
        write_frame(&mut stream, &request).await.unwrap();
        let frame = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(
            decode(&frame).unwrap(),
            Message::response(1, Outcome::success(json!("pong")))
        );

        stop_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
        assert!(!socket_path.exists());
    }
}
