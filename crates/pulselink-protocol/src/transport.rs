//! Message-preserving links between a device and a companion.
//!
//! A [`Link`] is one session: a pair of channels where every item is one
//! complete frame as produced by [`encode`](crate::encode). Anything that can
//! produce links implements [`Transport`].

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::codec::{read_frame, write_frame};
use crate::error::{ProtocolError, TransportError, TransportResult};

/// Frames buffered per direction before senders wait.
pub const LINK_CAPACITY: usize = 64;

/// One end of a bidirectional, frame-preserving session.
#[derive(Debug)]
pub struct Link {
    /// Outbound frames.
    pub tx: mpsc::Sender<Vec<u8>>,
    /// Inbound frames. Yields `None` once the peer is gone.
    pub rx: mpsc::Receiver<Vec<u8>>,
}

impl Link {
    pub fn split(self) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        (self.tx, self.rx)
    }
}

/// Creates two connected link ends.
pub fn link_pair() -> (Link, Link) {
    let (a_tx, b_rx) = mpsc::channel(LINK_CAPACITY);
    let (b_tx, a_rx) = mpsc::channel(LINK_CAPACITY);
    (
        Link { tx: a_tx, rx: a_rx },
        Link { tx: b_tx, rx: b_rx },
    )
}

/// Future returned by [`Transport::connect`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = TransportResult<Link>> + Send>>;

/// Something a device endpoint can open links through.
pub trait Transport: Send + Sync {
    /// Opens a new session.
    fn connect(&self) -> ConnectFuture;

    /// Short label for logs.
    fn name(&self) -> &str {
        "transport"
    }
}

/// In-process transport.
///
/// Every `connect()` creates a fresh [`link_pair`] and hands the far end to
/// the paired [`Acceptor`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    incoming: mpsc::UnboundedSender<Link>,
}

/// Receiving side of a [`MemoryTransport`].
#[derive(Debug)]
pub struct Acceptor {
    incoming: mpsc::UnboundedReceiver<Link>,
}

impl MemoryTransport {
    /// Creates a transport and the acceptor that receives its sessions.
    pub fn new() -> (Self, Acceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { incoming: tx }, Acceptor { incoming: rx })
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> ConnectFuture {
        let incoming = self.incoming.clone();
        Box::pin(async move {
            let (near, far) = link_pair();
            incoming
                .send(far)
                .map_err(|_| TransportError::connect("no acceptor listening"))?;
            Ok(near)
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

impl Acceptor {
    /// Waits for the next session. Returns `None` once every transport
    /// handle is dropped.
    pub async fn accept(&mut self) -> Option<Link> {
        self.incoming.recv().await
    }

    /// Returns a session that is already waiting, without blocking.
    pub fn try_accept(&mut self) -> Option<Link> {
        self.incoming.try_recv().ok()
    }
}

/// Wraps a byte stream into a [`Link`].
///
/// Two tasks are spawned: one reads length-prefixed frames into the link, one
/// writes outbound frames to the stream. Dropping the returned link's sender
/// shuts the write half down; the read task stops on EOF, on a stream error,
/// or once the link's receiver is dropped.
pub fn bridge_stream<S>(stream: S) -> Link
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(LINK_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(LINK_CAPACITY);

    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                frame = read_frame(&mut reader) => frame,
                _ = inbound_tx.closed() => break,
            };
            match frame {
                Ok(Some(frame)) => {
                    trace!(len = frame.len(), "Frame read from stream");
                    if inbound_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Stream closed by peer");
                    break;
                }
                // Nothing follows the header, so the stream is still aligned.
                Err(ProtocolError::EmptyMessage) => {
                    warn!("Dropping empty frame");
                }
                Err(e) => {
                    warn!(error = %e, "Stream read failed, closing link");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                warn!(error = %e, "Stream write failed, closing link");
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    Link {
        tx: outbound_tx,
        rx: inbound_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};
    use crate::message::Message;
    use serde_json::json;

    #[tokio::test]
    async fn link_pair_is_bidirectional() {
        let (mut a, mut b) = link_pair();
        a.tx.send(vec![1]).await.unwrap();
        b.tx.send(vec![2]).await.unwrap();
        assert_eq!(b.rx.recv().await, Some(vec![1]));
        assert_eq!(a.rx.recv().await, Some(vec![2]));

        drop(b);
        assert_eq!(a.rx.recv().await, None);
        assert!(a.tx.send(vec![3]).await.is_err());
    }

    #[tokio::test]
    async fn memory_transport_hands_far_end_to_acceptor() {
        let (transport, mut acceptor) = MemoryTransport::new();
        let mut near = transport.connect().await.unwrap();
        let mut far = acceptor.accept().await.unwrap();

        near.tx.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(far.rx.recv().await.unwrap(), b"ping");
        far.tx.send(b"pong".to_vec()).await.unwrap();
        assert_eq!(near.rx.recv().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn memory_transport_without_acceptor_fails() {
        let (transport, acceptor) = MemoryTransport::new();
        drop(acceptor);
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }

    #[tokio::test]
    async fn bridged_streams_carry_frames() {
        let (left, right) = tokio::io::duplex(4096);
        let mut a = bridge_stream(left);
        let mut b = bridge_stream(right);

        let message = Message::request(1, "CHECK_NETWORK", json!({}));
        a.tx.send(encode(&message).unwrap()).await.unwrap();
        let frame = b.rx.recv().await.unwrap();
        assert_eq!(decode(&frame).unwrap(), message);

        let reply = Message::call(2, "SETTINGS_CHANGED", json!({"authToken": "t"}));
        b.tx.send(encode(&reply).unwrap()).await.unwrap();
        assert_eq!(decode(&a.rx.recv().await.unwrap()).unwrap(), reply);
    }

    #[tokio::test]
    async fn dropping_one_side_closes_the_other() {
        let (left, right) = tokio::io::duplex(4096);
        let a = bridge_stream(left);
        let mut b = bridge_stream(right);

        drop(a);
        assert_eq!(b.rx.recv().await, None);
    }
}
