//! Unix signal handling for the companion daemon.
//!
//! - SIGTERM/SIGINT: graceful shutdown
//! - SIGHUP: reload settings from disk

use std::io;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Turns process signals into watch-channel notifications.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    shutdown_tx: Arc<watch::Sender<bool>>,
    /// Counts reload requests so every SIGHUP is observed.
    reload_tx: Arc<watch::Sender<u64>>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHandler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (reload_tx, _) = watch::channel(0);
        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            reload_tx: Arc::new(reload_tx),
        }
    }

    /// Installs the signal handlers and spawns the listener task.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn spawn_listener(&self) -> io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let handler = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating shutdown");
                        handler.trigger_shutdown();
                        break;
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT, initiating shutdown");
                        handler.trigger_shutdown();
                        break;
                    }
                    _ = sighup.recv() => {
                        info!("Received SIGHUP, reloading settings");
                        handler.trigger_reload();
                    }
                }
            }
        });
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn spawn_listener(&self) -> io::Result<()> {
        let handler = self.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received Ctrl+C, initiating shutdown");
                handler.trigger_shutdown();
            }
        });
        Ok(())
    }

    /// Completes once shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        // Only fails if the sender is gone, which `self` prevents.
        let _ = rx.wait_for(|shutdown| *shutdown).await;
    }

    /// Receiver that changes on every reload request.
    pub fn reloads(&self) -> watch::Receiver<u64> {
        self.reload_tx.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn trigger_reload(&self) {
        self.reload_tx.send_modify(|count| *count += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_is_observed() {
        let handler = SignalHandler::new();
        assert!(!handler.is_shutdown());

        let waiter = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.wait_for_shutdown().await })
        };
        handler.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(handler.is_shutdown());

        // Waiting after the fact returns immediately.
        handler.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn every_reload_is_seen() {
        let handler = SignalHandler::new();
        let mut reloads = handler.reloads();

        handler.trigger_reload();
        reloads.changed().await.unwrap();
        assert_eq!(*reloads.borrow_and_update(), 1);

        handler.trigger_reload();
        handler.trigger_reload();
        reloads.changed().await.unwrap();
        assert_eq!(*reloads.borrow_and_update(), 3);
        assert!(!reloads.has_changed().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn listener_installs() {
        let handler = SignalHandler::new();
        assert!(handler.spawn_listener().is_ok());
    }
}
