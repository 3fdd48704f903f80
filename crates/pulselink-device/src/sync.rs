//! Forwarding sensor readings to the companion.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pulselink_core::{
    AppSettings, HeartRateSample, LocationFix, LocationSample, Snapshot, is_valid_heart_rate,
};
use pulselink_protocol::methods;

use crate::endpoint::DeviceEndpoint;
use crate::error::{DeviceError, DeviceResult};
use crate::sensors::{HeartRateFeed, LocationFeed};

/// Status shown before the first sync attempt.
pub const STATUS_IDLE: &str = "not synced";

struct AgentInner {
    endpoint: DeviceEndpoint,
    heart_rate: HeartRateFeed,
    location: LocationFeed,
    device_id: Option<String>,
    settings: Arc<watch::Sender<AppSettings>>,
    status: Arc<watch::Sender<String>>,
    last_synced: Mutex<Option<DateTime<Utc>>>,
}

/// Sends readings through a [`DeviceEndpoint`] and tracks the outcome.
///
/// The latest outcome is kept as a short status line (for example
/// `"heart rate synced"` or `"sync failed: ..."`). A failed sync never
/// prevents later ones.
#[derive(Clone)]
pub struct SyncAgent {
    inner: Arc<AgentInner>,
}

impl SyncAgent {
    /// Creates an agent and subscribes it to `SETTINGS_CHANGED` pushes.
    pub fn new(endpoint: DeviceEndpoint, heart_rate: HeartRateFeed, location: LocationFeed) -> Self {
        let (settings, _) = watch::channel(AppSettings::default());
        let (status, _) = watch::channel(STATUS_IDLE.to_string());
        let settings = Arc::new(settings);
        let status = Arc::new(status);

        {
            let settings = settings.clone();
            let status = status.clone();
            endpoint.on_method(methods::SETTINGS_CHANGED, move |call| {
                let updated: AppSettings = serde_json::from_value(call.params.clone())?;
                info!(settings = ?updated.redacted(), "Settings pushed by companion");
                settings.send_replace(updated);
                status.send_replace("settings updated".to_string());
                Ok(())
            });
        }

        let device_id = endpoint.config().device_id.clone();
        Self {
            inner: Arc::new(AgentInner {
                endpoint,
                heart_rate,
                location,
                device_id,
                settings,
                status,
                last_synced: Mutex::new(None),
            }),
        }
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.inner.endpoint
    }

    /// Settings last received from the companion.
    pub fn settings(&self) -> AppSettings {
        self.inner.settings.borrow().clone()
    }

    pub fn status(&self) -> String {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<String> {
        self.inner.status.subscribe()
    }

    /// Time of the last successful sync.
    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        *self
            .inner
            .last_synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Asks the companion for its settings and keeps a local copy.
    pub async fn fetch_settings(&self) -> DeviceResult<AppSettings> {
        let reply = self
            .inner
            .endpoint
            .request(methods::GET_SETTINGS, Value::Object(Default::default()))
            .await?;
        let settings: AppSettings = serde_json::from_value(reply["settings"].clone())
            .map_err(|e| DeviceError::Protocol(format!("invalid settings reply: {}", e)))?;
        self.inner.settings.send_replace(settings.clone());
        Ok(settings)
    }

    /// Sends one heart-rate reading. Values outside 1..=199 bpm are rejected
    /// without contacting the companion.
    pub async fn sync_heart_rate(&self, bpm: u16) -> DeviceResult<Value> {
        let result = if is_valid_heart_rate(bpm) {
            let mut sample = HeartRateSample::new(bpm, Utc::now());
            if let Some(id) = &self.inner.device_id {
                sample = sample.with_device_id(id);
            }
            self.send(methods::SEND_HEART_RATE, &sample).await
        } else {
            Err(DeviceError::invalid_reading(format!(
                "heart rate {} bpm out of range",
                bpm
            )))
        };
        self.finish("heart rate synced", result)
    }

    /// Sends one location fix. The fix must be valid and non-zero.
    pub async fn sync_location(&self, fix: LocationFix) -> DeviceResult<Value> {
        let result = match fix.usable() {
            Some(coordinates) => {
                let mut sample = LocationSample::new(coordinates, Utc::now());
                if let Some(id) = &self.inner.device_id {
                    sample = sample.with_device_id(id);
                }
                self.send(methods::SEND_LOCATION, &sample).await
            }
            None => Err(DeviceError::invalid_reading("no valid location fix")),
        };
        self.finish("location synced", result)
    }

    /// Sends whatever readings the sensors currently hold.
    pub async fn manual_sync(&self) -> DeviceResult<Value> {
        let mut snapshot = Snapshot::new(Utc::now())
            .with_heart_rate(self.inner.heart_rate.current())
            .with_location(self.inner.location.current().and_then(|fix| fix.usable()));
        if let Some(id) = &self.inner.device_id {
            snapshot = snapshot.with_device_id(id);
        }

        if snapshot.is_empty() {
            debug!("Manual sync without fresh readings");
        }
        let result = self.send(methods::MANUAL_SYNC, &snapshot).await;
        self.finish("manual sync complete", result)
    }

    /// Sends the current readings, then every new one, until `shutdown`
    /// resolves. A sync still in flight at that point is abandoned.
    pub async fn run_auto_sync<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut heart_rate = self.inner.heart_rate.subscribe();
        let mut location = self.inner.location.subscribe();
        heart_rate.mark_changed();
        location.mark_changed();
        tokio::pin!(shutdown);
        info!("Auto sync started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Ok(()) = heart_rate.changed() => {
                    let reading = *heart_rate.borrow_and_update();
                    if let Some(bpm) = reading {
                        tokio::select! {
                            _ = self.sync_heart_rate(bpm) => {}
                            _ = &mut shutdown => break,
                        }
                    }
                }
                Ok(()) = location.changed() => {
                    let reading = *location.borrow_and_update();
                    if let Some(fix) = reading {
                        tokio::select! {
                            _ = self.sync_location(fix) => {}
                            _ = &mut shutdown => break,
                        }
                    }
                }
            }
        }

        info!("Auto sync stopped");
    }

    async fn send<T: Serialize>(&self, method: &str, params: &T) -> DeviceResult<Value> {
        let params =
            serde_json::to_value(params).map_err(|e| DeviceError::Protocol(e.to_string()))?;
        self.inner.endpoint.request(method, params).await
    }

    fn finish(&self, success: &str, result: DeviceResult<Value>) -> DeviceResult<Value> {
        let status = match &result {
            Ok(_) => {
                *self
                    .inner
                    .last_synced
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
                success.to_string()
            }
            Err(e) => {
                warn!(error = %e, "Sync failed");
                format!("sync failed: {}", e)
            }
        };
        self.inner.status.send_replace(status);
        result
    }
}
