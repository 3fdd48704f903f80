//! Device endpoint: request correlation, call handlers, sync agent
//!
//! This crate provides the watch side of pulselink and the
//! `pulselink-device` command-line tool.

pub mod cli;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod monitor;
pub mod pending;
pub mod sensors;
pub mod socket;
pub mod sync;

pub use config::DeviceConfig;
pub use endpoint::{DeviceEndpoint, DeviceEndpointBuilder};
pub use error::{DeviceError, DeviceResult};
pub use events::{CallHandler, CallHandlers, EmitReport, HandlerError};
pub use sensors::{HeartRateFeed, LocationFeed, SensorFeed};
pub use socket::UnixSocketTransport;
pub use sync::SyncAgent;
