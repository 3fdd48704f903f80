//! Core types: sensor readings, sync payloads, settings, tracing

pub mod payload;
pub mod reading;
pub mod settings;
pub mod tracing;

pub use payload::{HeartRateSample, LatLng, LocationSample, RemoteReport, Snapshot};
pub use reading::{
    Coordinates, FixValidity, HEART_RATE_RANGE, LocationFix, is_valid_heart_rate,
};
pub use settings::{AppSettings, SettingsPatch};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
