//! Request parameters exchanged for sync methods, and the body pushed to the
//! remote API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reading::{Coordinates, is_valid_heart_rate};

/// Parameters of `SEND_HEART_RATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRateSample {
    /// Beats per minute.
    pub value: u16,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl HeartRateSample {
    pub fn new(value: u16, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            timestamp,
            device_id: None,
        }
    }

    /// Builder: tag the sample with the originating device.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// Parameters of `SEND_LOCATION`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl LocationSample {
    pub fn new(coordinates: Coordinates, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            timestamp,
            device_id: None,
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Parameters of `MANUAL_SYNC` and `SEND_DATA`: whatever the device had at
/// hand, each reading optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinates>,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl Snapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            heart_rate: None,
            location: None,
            timestamp,
            device_id: None,
        }
    }

    pub fn with_heart_rate(mut self, bpm: Option<u16>) -> Self {
        self.heart_rate = bpm;
        self
    }

    pub fn with_location(mut self, location: Option<Coordinates>) -> Self {
        self.location = location;
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Returns true if neither reading is present.
    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none() && self.location.is_none()
    }
}

/// Location as the remote API spells it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<Coordinates> for LatLng {
    fn from(c: Coordinates) -> Self {
        Self {
            lat: c.latitude,
            lng: c.longitude,
        }
    }
}

/// JSON body POSTed to the remote endpoint:
/// `{"heart_rate": 75, "location": {"lat": 39.9, "lng": 116.4}}`.
///
/// Fields without a reading are omitted rather than filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LatLng>,
}

impl RemoteReport {
    /// Builds a report, dropping implausible heart-rate values.
    pub fn new(heart_rate: Option<u16>, location: Option<Coordinates>) -> Self {
        Self {
            heart_rate: heart_rate.filter(|bpm| is_valid_heart_rate(*bpm)),
            location: location.map(LatLng::from),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none() && self.location.is_none()
    }
}
