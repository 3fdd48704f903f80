//! Device/companion messaging protocol for pulselink.
//!
//! # Protocol Overview
//!
//! Messages are sent as length-prefixed JSON:
//! - 4 bytes: payload length (u32, big-endian)
//! - N bytes: JSON payload
//!
//! Every [`Message`] is one of:
//! - `request`: carries an id and an [`Invocation`], answered by exactly one
//!   `response` with the same id
//! - `response`: carries an [`Outcome`] (success value or [`ErrorDescriptor`])
//! - `call`: a fire-and-forget push
//!
//! # Example
//!
//! ```rust
//! use pulselink_protocol::{Message, decode, encode, methods};
//! use serde_json::json;
//!
//! let request = Message::request(1, methods::SEND_HEART_RATE, json!({"value": 75}));
//! let bytes = encode(&request).unwrap();
//! assert_eq!(decode(&bytes).unwrap(), request);
//! ```

mod codec;
mod error;
mod message;
pub mod methods;
mod transport;

pub use codec::{HEADER_LEN, decode, encode, read_frame, write_frame};
pub use error::{ProtocolError, ProtocolResult, TransportError, TransportResult};
pub use message::{ErrorCode, ErrorDescriptor, Invocation, Message, MessageId, MessageKind, Outcome};
pub use transport::{
    Acceptor, ConnectFuture, LINK_CAPACITY, Link, MemoryTransport, Transport, bridge_stream,
    link_pair,
};

/// Maximum payload size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
