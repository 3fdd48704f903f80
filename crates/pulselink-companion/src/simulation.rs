//! In-process companion used when no real one is reachable.
//!
//! It serves the full method set with the same handlers as the daemon, but
//! remote pushes are recorded instead of sent and settings live in memory.

use std::sync::Arc;

use tracing::info;

use pulselink_core::AppSettings;
use pulselink_protocol::MemoryTransport;

use crate::endpoint::CompanionEndpoint;
use crate::handlers::SyncService;
use crate::push::RecordingPush;
use crate::settings::{SettingsManager, spawn_settings_fanout};

/// Endpoint reported by the simulated companion. Never contacted.
pub const SIMULATED_ENDPOINT: &str = "http://127.0.0.1/pulselink-simulated";

/// A running simulated companion.
#[derive(Debug, Clone)]
pub struct SimulatedCompanion {
    pub transport: MemoryTransport,
    pub endpoint: CompanionEndpoint,
    pub push: Arc<RecordingPush>,
}

impl SimulatedCompanion {
    /// Starts serving. Must be called from within a tokio runtime.
    pub fn spawn() -> Self {
        let push = Arc::new(RecordingPush::new());
        let settings = SettingsManager::in_memory(AppSettings::new(SIMULATED_ENDPOINT, ""));
        let service = SyncService::new(push.clone(), settings.clone());
        let endpoint = CompanionEndpoint::new(service.registry());
        let (transport, acceptor) = MemoryTransport::new();

        tokio::spawn(endpoint.clone().serve_acceptor(acceptor));
        spawn_settings_fanout(settings, endpoint.clone());
        info!("Simulated companion started");

        Self {
            transport,
            endpoint,
            push,
        }
    }
}

/// Starts a simulated companion and returns a transport connected to it.
pub fn spawn_simulated_companion() -> MemoryTransport {
    SimulatedCompanion::spawn().transport
}
