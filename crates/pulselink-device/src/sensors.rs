//! Latest-value feeds for on-device sensors.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use pulselink_core::{LocationFix, is_valid_heart_rate};

/// Holds the latest reading of one sensor and notifies subscribers.
///
/// Publishing an unchanged value does not wake subscribers.
#[derive(Debug, Clone)]
pub struct SensorFeed<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> SensorFeed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Returns the latest value.
    pub fn current(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replaces the latest value. Returns true if it changed.
    pub fn publish(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Subscribes to changes made after this call.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T> Default for SensorFeed<T>
where
    T: Clone + PartialEq + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Latest heart rate in bpm, `None` until the sensor reports.
pub type HeartRateFeed = SensorFeed<Option<u16>>;

/// Latest location fix, `None` until the receiver reports.
pub type LocationFeed = SensorFeed<Option<LocationFix>>;

impl SensorFeed<Option<u16>> {
    /// Records a raw sensor value, ignoring implausible readings.
    pub fn record(&self, bpm: u16) -> bool {
        if !is_valid_heart_rate(bpm) {
            trace!(bpm, "Ignoring heart-rate reading out of range");
            return false;
        }
        self.publish(Some(bpm))
    }
}

impl SensorFeed<Option<LocationFix>> {
    /// Records a receiver report. Reports without a usable fix are ignored so
    /// the last good position stays current.
    pub fn record(&self, fix: LocationFix) -> bool {
        if fix.usable().is_none() {
            trace!(?fix, "Ignoring location without a usable fix");
            return false;
        }
        self.publish(Some(fix))
    }
}
