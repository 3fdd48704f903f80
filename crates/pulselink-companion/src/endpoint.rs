//! Companion side of the link: serves device requests and pushes calls.
//!
//! A [`CompanionEndpoint`] can serve any number of sessions at once. Every
//! request is dispatched on its own task, so a slow handler only delays its
//! own response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

use pulselink_protocol::{
    Acceptor, ErrorDescriptor, Invocation, Link, Message, MessageId, Outcome, decode, encode,
};

use crate::error::CompanionResult;
use crate::registry::HandlerRegistry;

/// Serves device sessions against a [`HandlerRegistry`].
#[derive(Debug, Clone)]
pub struct CompanionEndpoint {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: HandlerRegistry,
    sessions: Mutex<HashMap<u64, mpsc::Sender<Vec<u8>>>>,
    next_session: AtomicU64,
    next_call_id: AtomicU64,
}

impl CompanionEndpoint {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                sessions: Mutex::new(HashMap::new()),
                next_session: AtomicU64::new(0),
                next_call_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Number of sessions currently being served.
    pub fn session_count(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Serves one session until the device side goes away.
    pub async fn serve(self, link: Link) {
        let (tx, mut rx) = link.split();
        let session = self.inner.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session, tx.clone());
        info!(session, "Device session opened");

        while let Some(frame) = rx.recv().await {
            let message = match decode(&frame) {
                Ok(message) => message,
                Err(e) => {
                    warn!(session, error = %e, "Dropping malformed frame");
                    continue;
                }
            };

            match message {
                Message::Request { id, payload } => {
                    let registry = self.inner.registry.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        handle_request(&registry, &tx, session, id, payload).await;
                    });
                }
                other => {
                    debug!(
                        session,
                        id = other.id(),
                        kind = %other.kind(),
                        "Ignoring message that is not a request"
                    );
                }
            }
        }

        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session);
        info!(session, "Device session closed");
    }

    /// Serves every session handed over by `acceptor`.
    pub async fn serve_acceptor(self, mut acceptor: Acceptor) {
        while let Some(link) = acceptor.accept().await {
            tokio::spawn(self.clone().serve(link));
        }
        debug!("Acceptor closed");
    }

    /// Pushes a call to every connected device.
    ///
    /// Best effort: sessions that went away or stopped draining their link
    /// are skipped, never waited on. Returns how many sessions the call was
    /// handed to.
    pub async fn send(&self, method: &str, params: Value) -> CompanionResult<usize> {
        let id = self.inner.next_call_id.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = encode(&Message::call(id, method, params))?;

        let targets: Vec<(u64, mpsc::Sender<Vec<u8>>)> = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(session, tx)| (*session, tx.clone()))
            .collect();

        let mut reached = 0;
        for (session, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => reached += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(session, method, "Session backlogged, call not delivered");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session, method, "Session gone, call not delivered");
                }
            }
        }
        debug!(id, method, reached, "Call pushed");
        Ok(reached)
    }
}

async fn handle_request(
    registry: &HandlerRegistry,
    tx: &mpsc::Sender<Vec<u8>>,
    session: u64,
    id: MessageId,
    invocation: Invocation,
) {
    trace!(session, id, method = %invocation.method, "Request received");
    let outcome = registry
        .dispatch(&invocation.method, invocation.params)
        .await;

    let frame = match encode(&Message::response(id, outcome)) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(session, id, error = %e, "Response could not be encoded");
            let fallback = Outcome::failure(ErrorDescriptor::internal(e.to_string()));
            match encode(&Message::response(id, fallback)) {
                Ok(frame) => frame,
                Err(_) => return,
            }
        }
    };

    if tx.send(frame).await.is_err() {
        debug!(session, id, "Session closed before response was sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulselink_protocol::{ErrorCode, MemoryTransport, Transport, link_pair};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn next_message(link: &mut Link) -> Message {
        decode(&link.rx.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn answers_requests_on_the_same_session() {
        let mut registry = HandlerRegistry::new();
        registry.register("ADD", |params: Value| async move {
            let a = params["a"].as_i64().unwrap_or(0);
            let b = params["b"].as_i64().unwrap_or(0);
            Ok::<_, ErrorDescriptor>(json!(a + b))
        });
        let (mut device, companion_side) = link_pair();
        tokio::spawn(CompanionEndpoint::new(registry).serve(companion_side));

        let request = Message::request(7, "ADD", json!({"a": 2, "b": 3}));
        device.tx.send(encode(&request).unwrap()).await.unwrap();
        assert_eq!(
            next_message(&mut device).await,
            Message::response(7, Outcome::success(json!(5)))
        );
    }

    #[tokio::test]
    async fn slow_handler_does_not_block_others() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));

        let mut registry = HandlerRegistry::new();
        registry.register("SLOW", move |_| {
            let release_rx = release_rx.lock().unwrap().take();
            async move {
                if let Some(rx) = release_rx {
                    let _ = rx.await;
                }
                Ok::<_, ErrorDescriptor>(json!("slow"))
            }
        });
        registry.register("FAST", |_| async { Ok::<_, ErrorDescriptor>(json!("fast")) });

        let (mut device, companion_side) = link_pair();
        tokio::spawn(CompanionEndpoint::new(registry).serve(companion_side));

        for message in [
            Message::request(1, "SLOW", Value::Null),
            Message::request(2, "FAST", Value::Null),
        ] {
            device.tx.send(encode(&message).unwrap()).await.unwrap();
        }

        assert_eq!(next_message(&mut device).await.id(), 2);
        release_tx.send(()).unwrap();
        assert_eq!(
            next_message(&mut device).await,
            Message::response(1, Outcome::success(json!("slow")))
        );
    }

    #[tokio::test]
    async fn unknown_method_gets_failure_response() {
        let (mut device, companion_side) = link_pair();
        tokio::spawn(CompanionEndpoint::new(HandlerRegistry::new()).serve(companion_side));

        let request = Message::request(3, "GET_DATA", json!({}));
        device.tx.send(encode(&request).unwrap()).await.unwrap();
        let Message::Response { id, payload } = next_message(&mut device).await else {
            panic!("expected a response");
        };
        assert_eq!(id, 3);
        assert_eq!(
            payload.into_result().unwrap_err().code,
            ErrorCode::MethodNotSupported
        );
    }

    #[tokio::test]
    async fn malformed_and_unexpected_frames_are_skipped() {
        let mut registry = HandlerRegistry::new();
        registry.register("PING", |_| async { Ok::<_, ErrorDescriptor>(json!("pong")) });
        let (mut device, companion_side) = link_pair();
        tokio::spawn(CompanionEndpoint::new(registry).serve(companion_side));

        device.tx.send(vec![0, 0, 0, 2, b'{', b'}']).await.unwrap();
        device.tx.send(b"garbage".to_vec()).await.unwrap();
        let stray = Message::response(99, Outcome::success(Value::Null));
        device.tx.send(encode(&stray).unwrap()).await.unwrap();
        let call = Message::call(5, "HELLO", Value::Null);
        device.tx.send(encode(&call).unwrap()).await.unwrap();

        let request = Message::request(1, "PING", Value::Null);
        device.tx.send(encode(&request).unwrap()).await.unwrap();
        assert_eq!(
            next_message(&mut device).await,
            Message::response(1, Outcome::success(json!("pong")))
        );
    }

    #[tokio::test]
    async fn send_reaches_every_session() {
        let (transport, acceptor) = MemoryTransport::new();
        let companion = CompanionEndpoint::new(HandlerRegistry::new());
        tokio::spawn(companion.clone().serve_acceptor(acceptor));

        let mut first = transport.connect().await.unwrap();
        let mut second = transport.connect().await.unwrap();
        while companion.session_count() < 2 {
            tokio::task::yield_now().await;
        }

        let reached = companion
            .send("SETTINGS_CHANGED", json!({"authToken": "t"}))
            .await
            .unwrap();
        assert_eq!(reached, 2);

        for link in [&mut first, &mut second] {
            let message = next_message(link).await;
            assert_eq!(message.method(), Some("SETTINGS_CHANGED"));
            assert_eq!(message.id(), 1);
        }

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), async {
            while companion.session_count() > 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(companion.send("SETTINGS_CHANGED", Value::Null).await.unwrap(), 1);
        assert_eq!(next_message(&mut second).await.id(), 2);
    }

    #[tokio::test]
    async fn stalled_session_does_not_hold_up_push() {
        let companion = CompanionEndpoint::new(HandlerRegistry::new());
        let (_stalled, stalled_side) = link_pair();
        let (mut healthy, healthy_side) = link_pair();
        tokio::spawn(companion.clone().serve(stalled_side));
        tokio::spawn(companion.clone().serve(healthy_side));
        while companion.session_count() < 2 {
            tokio::task::yield_now().await;
        }

        // The stalled device never reads, so its link fills up.
        let pushes = pulselink_protocol::LINK_CAPACITY + 8;
        let mut delivered = 0;
        for _ in 0..pushes {
            delivered += tokio::time::timeout(
                Duration::from_secs(1),
                companion.send("SETTINGS_CHANGED", Value::Null),
            )
            .await
            .expect("push must not wait on a stalled session")
            .unwrap();
            let message = next_message(&mut healthy).await;
            assert_eq!(message.method(), Some("SETTINGS_CHANGED"));
        }
        assert_eq!(delivered, pushes + pulselink_protocol::LINK_CAPACITY);
    }

    #[tokio::test]
    async fn send_without_sessions_reaches_nobody() {
        let companion = CompanionEndpoint::new(HandlerRegistry::new());
        assert_eq!(companion.send("SETTINGS_CHANGED", Value::Null).await.unwrap(), 0);
    }
}
