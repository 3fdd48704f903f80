//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or framing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum allowed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Failed to serialize a message to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The payload is not a well-formed message.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The frame ended before the announced payload length.
    #[error("incomplete message: expected {expected} bytes, got {received}")]
    IncompleteMessage { expected: usize, received: usize },

    /// The frame carries bytes past the announced payload length.
    #[error("trailing bytes: expected {expected} bytes, got {received}")]
    TrailingBytes { expected: usize, received: usize },

    /// Zero-length payload.
    #[error("empty message")]
    EmptyMessage,

    /// IO error while reading or writing a stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for errors meaning "these bytes are not a valid message".
    ///
    /// Endpoints drop such frames and keep going.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_)
                | Self::IncompleteMessage { .. }
                | Self::TrailingBytes { .. }
                | Self::EmptyMessage
                | Self::MessageTooLarge { .. }
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Connecting took longer than allowed.
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// The link was closed while sending.
    #[error("link closed")]
    Closed,

    /// IO error on the underlying stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Creates a connect error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }
}
