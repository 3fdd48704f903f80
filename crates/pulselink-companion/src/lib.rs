//! Companion service: request dispatch, remote push, settings
//!
//! This crate provides the host side of pulselink: a [`CompanionEndpoint`]
//! that answers device requests through a [`HandlerRegistry`], the handlers
//! that forward readings to a remote HTTP API, and the `pulselink-companion`
//! daemon that serves them over a Unix socket.

pub mod cli;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod handlers;
pub mod push;
pub mod registry;
pub mod settings;
pub mod signals;
pub mod simulation;
pub mod socket;

pub use config::{CompanionConfig, default_settings_path, default_socket_path};
pub use endpoint::CompanionEndpoint;
pub use error::{
    CompanionError, CompanionResult, PushError, PushResult, SettingsError, SettingsResult,
};
pub use handlers::{LastKnown, SyncService};
pub use push::{BoxFuture, HttpPushClient, PushReply, PushRequest, RecordingPush, RemotePush};
pub use registry::{HandlerFuture, HandlerRegistry};
pub use settings::{
    FileSettingsStore, MemorySettingsStore, SettingsManager, SettingsStore, spawn_settings_fanout,
};
pub use signals::SignalHandler;
pub use simulation::{SimulatedCompanion, spawn_simulated_companion};
pub use socket::SocketServer;
