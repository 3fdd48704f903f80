//! Table of requests awaiting a response.
//!
//! Three paths can finish a request: its response, its timeout, and a
//! disconnect. Each goes through [`PendingTable::take`], so whichever path
//! removes the entry first settles it and the others find nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use pulselink_protocol::MessageId;

use crate::error::{DeviceError, DeviceResult};

/// Receives the result of one request.
pub type Responder = oneshot::Sender<DeviceResult<Value>>;

/// An in-flight request.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: MessageId,
    pub method: String,
    pub created_at: Instant,
    responder: Responder,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    /// Delivers the result, consuming the entry.
    ///
    /// Returns false if the caller stopped waiting.
    pub fn settle(self, result: DeviceResult<Value>) -> bool {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
        self.responder.send(result).is_ok()
    }
}

/// Shared map from request id to pending request.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    inner: Arc<Mutex<HashMap<MessageId, PendingRequest>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MessageId, PendingRequest>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a request and arms its timeout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn insert(
        &self,
        id: MessageId,
        method: impl Into<String>,
        timeout: Duration,
        responder: Responder,
    ) {
        let method = method.into();
        self.lock().insert(
            id,
            PendingRequest {
                id,
                method: method.clone(),
                created_at: Instant::now(),
                responder,
                timer: None,
            },
        );

        let table = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(request) = table.take(id) {
                warn!(id, method = %request.method, ?timeout, "Request timed out");
                request.settle(Err(DeviceError::Timeout {
                    method,
                    after: timeout,
                }));
            }
        });

        match self.lock().get_mut(&id) {
            Some(request) => request.timer = Some(timer.abort_handle()),
            None => timer.abort(),
        }
    }

    /// Removes and returns the entry for `id`, if still pending.
    pub fn take(&self, id: MessageId) -> Option<PendingRequest> {
        self.lock().remove(&id)
    }

    /// Settles the request with `id`. Returns false if nothing was pending.
    pub fn complete(&self, id: MessageId, result: DeviceResult<Value>) -> bool {
        match self.take(id) {
            Some(request) => {
                debug!(
                    id,
                    method = %request.method,
                    elapsed_ms = request.created_at.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "Request settled"
                );
                request.settle(result);
                true
            }
            None => false,
        }
    }

    /// Fails every pending request with `error` and empties the table.
    ///
    /// Returns how many requests were failed.
    pub fn fail_all(&self, error: DeviceError) -> usize {
        let drained: Vec<PendingRequest> = self.lock().drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for request in drained {
            request.settle(Err(error.clone()));
        }
        if count > 0 {
            debug!(count, error = %error, "Failed pending requests");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(table: &PendingTable, id: MessageId) -> oneshot::Receiver<DeviceResult<Value>> {
        let (tx, rx) = oneshot::channel();
        table.insert(id, "TEST", Duration::from_secs(10), tx);
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn complete_settles_once() {
        let table = PendingTable::new();
        let rx = insert(&table, 1);

        assert!(table.complete(1, Ok(json!("first"))));
        assert!(!table.complete(1, Ok(json!("second"))));
        assert_eq!(rx.await.unwrap().unwrap(), json!("first"));
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_entry() {
        let table = PendingTable::new();
        let rx = insert(&table, 7);

        tokio::time::advance(Duration::from_secs(11)).await;
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(DeviceError::Timeout { .. })));
        assert!(table.is_empty());
        assert!(!table.complete(7, Ok(json!(null))));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_request_does_not_time_out() {
        let table = PendingTable::new();
        let rx = insert(&table, 2);
        table.complete(2, Ok(json!(1)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(rx.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_all_drains() {
        let table = PendingTable::new();
        let receivers: Vec<_> = (1..=3).map(|id| insert(&table, id)).collect();
        assert_eq!(table.len(), 3);

        assert_eq!(table.fail_all(DeviceError::ConnectionClosed), 3);
        assert!(table.is_empty());
        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(DeviceError::ConnectionClosed)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn settle_reports_dropped_caller() {
        let table = PendingTable::new();
        let rx = insert(&table, 3);
        drop(rx);
        let request = table.take(3).unwrap();
        assert!(!request.settle(Ok(json!(null))));
    }
}
