//! Persisted companion settings and their propagation to devices.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pulselink_core::{AppSettings, SettingsPatch};
use pulselink_protocol::methods;

use crate::endpoint::CompanionEndpoint;
use crate::error::{SettingsError, SettingsResult};

/// Where settings live between runs.
pub trait SettingsStore: Send + Sync {
    /// Loads the stored settings. A store with nothing saved yields defaults.
    fn load(&self) -> SettingsResult<AppSettings>;

    fn save(&self, settings: &AppSettings) -> SettingsResult<()>;
}

/// TOML file store.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> SettingsResult<AppSettings> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No settings file, using defaults");
            return Ok(AppSettings::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| SettingsError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn save(&self, settings: &AppSettings) -> SettingsResult<()> {
        let content = toml::to_string_pretty(settings)?;
        let write_err = |source| SettingsError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(&self.path, content).map_err(write_err)?;
        debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

/// Store kept in memory only.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<AppSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: AppSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    /// What was last saved.
    pub fn saved(&self) -> AppSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> SettingsResult<AppSettings> {
        Ok(self.saved())
    }

    fn save(&self, settings: &AppSettings) -> SettingsResult<()> {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        Ok(())
    }
}

/// Current settings, backed by a store, with change notification.
#[derive(Clone)]
pub struct SettingsManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    store: Box<dyn SettingsStore>,
    tx: watch::Sender<AppSettings>,
    // Serializes read-modify-write so concurrent updates are not lost.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for SettingsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsManager")
            .field("current", &self.current().redacted())
            .finish()
    }
}

impl SettingsManager {
    /// Loads the initial settings from `store`.
    pub fn load(store: impl SettingsStore + 'static) -> SettingsResult<Self> {
        let initial = store.load()?;
        info!(settings = ?initial.redacted(), "Settings loaded");
        Ok(Self::from_parts(Box::new(store), initial))
    }

    /// Manager over a [`MemorySettingsStore`] seeded with `settings`.
    pub fn in_memory(settings: AppSettings) -> Self {
        let store = MemorySettingsStore::new(settings.clone());
        Self::from_parts(Box::new(store), settings)
    }

    fn from_parts(store: Box<dyn SettingsStore>, initial: AppSettings) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            inner: Arc::new(ManagerInner {
                store,
                tx,
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub fn current(&self) -> AppSettings {
        self.inner.tx.borrow().clone()
    }

    /// Receives every settings change made after this call.
    pub fn subscribe(&self) -> watch::Receiver<AppSettings> {
        self.inner.tx.subscribe()
    }

    /// Merges `patch`, persists, then notifies subscribers.
    ///
    /// A patch that changes nothing is neither saved nor broadcast. If saving
    /// fails the in-memory settings stay as they were.
    pub fn update(&self, patch: SettingsPatch) -> SettingsResult<AppSettings> {
        let _guard = self
            .inner
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = self.current();
        if !next.apply(patch) {
            debug!("Settings update changed nothing");
            return Ok(next);
        }
        self.inner.store.save(&next)?;
        self.inner.tx.send_replace(next.clone());
        info!(settings = ?next.redacted(), "Settings updated");
        Ok(next)
    }

    /// Re-reads the store. Returns true if the settings changed.
    pub fn reload(&self) -> SettingsResult<bool> {
        let _guard = self
            .inner
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let loaded = self.inner.store.load()?;
        let changed = self.inner.tx.send_if_modified(|current| {
            if *current == loaded {
                false
            } else {
                *current = loaded;
                true
            }
        });
        if changed {
            info!(settings = ?self.current().redacted(), "Settings reloaded");
        }
        Ok(changed)
    }
}

/// Pushes `SETTINGS_CHANGED` with the full settings to every connected device
/// whenever they change.
pub fn spawn_settings_fanout(manager: SettingsManager, endpoint: CompanionEndpoint) -> JoinHandle<()> {
    let mut rx = manager.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let settings = rx.borrow_and_update().clone();
            let params = match serde_json::to_value(&settings) {
                Ok(params) => params,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize settings");
                    continue;
                }
            };
            match endpoint.send(methods::SETTINGS_CHANGED, params).await {
                Ok(reached) => debug!(reached, "Settings change pushed"),
                Err(e) => warn!(error = %e, "Failed to push settings change"),
            }
        }
    })
}
