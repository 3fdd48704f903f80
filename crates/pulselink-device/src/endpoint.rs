//! Device side of the messaging layer.
//!
//! A [`DeviceEndpoint`] owns at most one link to a companion. It sends
//! requests and matches their responses by id, and it hands incoming calls
//! to registered handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pulselink_protocol::{
    Invocation, Message, Transport, TransportError, TransportResult, decode, encode,
};

use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::events::{CallHandlers, EmitReport, HandlerError};
use crate::pending::PendingTable;

struct Session {
    generation: u64,
    transport: String,
    tx: mpsc::Sender<Vec<u8>>,
    reader: JoinHandle<()>,
}

type SessionSlot = Arc<Mutex<Option<Session>>>;

fn lock(slot: &SessionSlot) -> MutexGuard<'_, Option<Session>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    config: DeviceConfig,
    primary: Arc<dyn Transport>,
    fallback: Option<Arc<dyn Transport>>,
    pending: PendingTable,
    calls: CallHandlers,
    next_id: AtomicU64,
    generation: AtomicU64,
    session: SessionSlot,
    connect_lock: tokio::sync::Mutex<()>,
    // Held while an id is allocated and its frame queued, so ids leave in
    // increasing order.
    send_lock: Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.session).take() {
            session.reader.abort();
        }
    }
}

/// Builds a [`DeviceEndpoint`].
pub struct DeviceEndpointBuilder {
    config: DeviceConfig,
    primary: Arc<dyn Transport>,
    fallback: Option<Arc<dyn Transport>>,
}

impl DeviceEndpointBuilder {
    /// Builder: set configuration.
    pub fn with_config(mut self, config: DeviceConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder: transport to use when the primary one cannot connect.
    pub fn with_fallback(mut self, transport: impl Transport + 'static) -> Self {
        self.fallback = Some(Arc::new(transport));
        self
    }

    pub fn build(self) -> DeviceEndpoint {
        DeviceEndpoint {
            inner: Arc::new(Inner {
                config: self.config,
                primary: self.primary,
                fallback: self.fallback,
                pending: PendingTable::new(),
                calls: CallHandlers::new(),
                next_id: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                session: Arc::new(Mutex::new(None)),
                connect_lock: tokio::sync::Mutex::new(()),
                send_lock: Mutex::new(()),
            }),
        }
    }
}

/// Device endpoint. Cheap to clone; clones share the same link and state.
#[derive(Clone)]
pub struct DeviceEndpoint {
    inner: Arc<Inner>,
}

impl DeviceEndpoint {
    /// Starts building an endpoint around its primary transport.
    pub fn builder(transport: impl Transport + 'static) -> DeviceEndpointBuilder {
        DeviceEndpointBuilder {
            config: DeviceConfig::default(),
            primary: Arc::new(transport),
            fallback: None,
        }
    }

    /// Creates an endpoint without a fallback transport.
    pub fn new(config: DeviceConfig, transport: impl Transport + 'static) -> Self {
        Self::builder(transport).with_config(config).build()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Returns true while a link is open.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.session).is_some()
    }

    /// Name of the transport behind the current link.
    pub fn transport_name(&self) -> Option<String> {
        lock(&self.inner.session)
            .as_ref()
            .map(|s| s.transport.clone())
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Opens a link over the primary transport if none is open.
    ///
    /// Failures are logged; check [`is_connected`](Self::is_connected).
    pub async fn connect(&self) {
        let _guard = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            return;
        }
        let primary = self.inner.primary.clone();
        if let Err(e) = self.open(primary.as_ref()).await {
            warn!(transport = primary.name(), error = %e, "Failed to connect");
        }
    }

    /// Closes the link and fails every pending request with
    /// `ConnectionClosed`.
    pub fn disconnect(&self) {
        let session = lock(&self.inner.session).take();
        if let Some(session) = session {
            session.reader.abort();
            info!(transport = %session.transport, "Disconnected");
        }
        self.inner.pending.fail_all(DeviceError::ConnectionClosed);
    }

    /// Sends a request and waits for its response.
    ///
    /// Connects first when needed, falling back to the fallback transport if
    /// the primary one fails.
    #[tracing::instrument(skip(self, params))]
    pub async fn request(&self, method: &str, params: Value) -> DeviceResult<Value> {
        let (generation, tx) = self.ensure_connected().await?;
        let permit = tx.reserve().await.map_err(|_| TransportError::Closed)?;

        let (responder, response) = oneshot::channel();
        let id = {
            let _order = self
                .inner
                .send_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let frame = encode(&Message::request(id, method, params))?;
            self.inner
                .pending
                .insert(id, method, self.inner.config.request_timeout, responder);
            permit.send(frame);
            id
        };

        // A disconnect that ran before the insert drained the table without
        // this entry, and the link it was queued on has no reader anymore.
        if !self.is_current(generation) {
            debug!(id, generation, "Session replaced while sending");
            self.inner
                .pending
                .complete(id, Err(DeviceError::ConnectionClosed));
        } else {
            debug!(id, "Request sent");
        }

        response.await.unwrap_or(Err(DeviceError::ConnectionClosed))
    }

    /// Registers a handler for every incoming call.
    pub fn on_call<F>(&self, handler: F)
    where
        F: Fn(&Invocation) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.calls.on_any(handler);
    }

    /// Registers a handler for incoming calls named `method`.
    pub fn on_method<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&Invocation) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.calls.on_method(method, handler);
    }

    async fn ensure_connected(&self) -> DeviceResult<(u64, mpsc::Sender<Vec<u8>>)> {
        if let Some(current) = self.sender() {
            return Ok(current);
        }

        let _guard = self.inner.connect_lock.lock().await;
        if let Some(current) = self.sender() {
            return Ok(current);
        }

        let primary = self.inner.primary.clone();
        if let Err(e) = self.open(primary.as_ref()).await {
            warn!(transport = primary.name(), error = %e, "Failed to connect");
            if let Some(fallback) = self.inner.fallback.clone() {
                info!(transport = fallback.name(), "Using fallback transport");
                if let Err(e) = self.open(fallback.as_ref()).await {
                    warn!(transport = fallback.name(), error = %e, "Fallback failed");
                }
            }
        }

        self.sender().ok_or(DeviceError::NotConnected)
    }

    fn sender(&self) -> Option<(u64, mpsc::Sender<Vec<u8>>)> {
        lock(&self.inner.session)
            .as_ref()
            .map(|s| (s.generation, s.tx.clone()))
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.inner.session)
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    async fn open(&self, transport: &dyn Transport) -> TransportResult<()> {
        let timeout = self.inner.config.connect_timeout;
        let link = tokio::time::timeout(timeout, transport.connect())
            .await
            .map_err(|_| TransportError::ConnectTimeout(timeout))??;

        let (tx, rx) = link.split();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        // The reader takes the same lock on exit, so it cannot observe the
        // slot before this session is stored.
        let mut slot = lock(&self.inner.session);
        let reader = tokio::spawn(read_loop(
            rx,
            generation,
            self.inner.pending.clone(),
            self.inner.calls.clone(),
            self.inner.session.clone(),
        ));
        *slot = Some(Session {
            generation,
            transport: transport.name().to_string(),
            tx,
            reader,
        });
        info!(transport = transport.name(), generation, "Connected");
        Ok(())
    }
}

async fn read_loop(
    mut rx: mpsc::Receiver<Vec<u8>>,
    generation: u64,
    pending: PendingTable,
    calls: CallHandlers,
    session: SessionSlot,
) {
    while let Some(frame) = rx.recv().await {
        route_frame(&frame, &pending, &calls);
    }

    let current = {
        let mut slot = lock(&session);
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            slot.take();
            true
        } else {
            false
        }
    };
    if current {
        info!(generation, "Link closed");
        pending.fail_all(DeviceError::ConnectionClosed);
    }
}

fn route_frame(frame: &[u8], pending: &PendingTable, calls: &CallHandlers) {
    let message = match decode(frame) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, len = frame.len(), "Dropping malformed frame");
            return;
        }
    };

    match message {
        Message::Response { id, payload } => {
            let result = payload.into_result().map_err(DeviceError::Remote);
            if !pending.complete(id, result) {
                debug!(id, "Dropping response for unknown or expired request");
            }
        }
        Message::Call { id, payload } => {
            let EmitReport { delivered, failed } = calls.emit(&payload);
            debug!(id, method = %payload.method, delivered, failed, "Call delivered");
        }
        Message::Request { id, payload } => {
            warn!(id, method = %payload.method, "Ignoring request sent to device");
        }
    }
}
