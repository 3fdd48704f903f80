//! Device error types.

use std::time::Duration;

use thiserror::Error;

use pulselink_protocol::{ErrorDescriptor, ProtocolError, TransportError};

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors a device-side request can fail with.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// The message could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Sending over the link failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response arrived within the request timeout.
    #[error("{method} timed out after {}ms", after.as_millis())]
    Timeout { method: String, after: Duration },

    /// The link went away while the request was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Neither the primary nor a fallback transport could be connected.
    #[error("Not connected to a companion")]
    NotConnected,

    /// The companion answered with a failure.
    #[error("Companion error: {0}")]
    Remote(ErrorDescriptor),

    /// A reading was rejected before anything was sent.
    #[error("Invalid reading: {message}")]
    InvalidReading { message: String },
}

impl DeviceError {
    /// Creates a remote error from a descriptor.
    pub fn remote(descriptor: ErrorDescriptor) -> Self {
        Self::Remote(descriptor)
    }

    /// Creates an invalid reading error.
    pub fn invalid_reading(message: impl Into<String>) -> Self {
        Self::InvalidReading {
            message: message.into(),
        }
    }

    /// Returns the companion's descriptor for remote failures.
    pub fn descriptor(&self) -> Option<&ErrorDescriptor> {
        match self {
            Self::Remote(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    /// True for `Timeout`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<ProtocolError> for DeviceError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<TransportError> for DeviceError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        let err = DeviceError::Timeout {
            method: "SEND_HEART_RATE".into(),
            after: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "SEND_HEART_RATE timed out after 10000ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn remote_keeps_descriptor() {
        let descriptor = ErrorDescriptor::remote_failure("HTTP 500").with_status(500);
        let err = DeviceError::remote(descriptor.clone());
        assert_eq!(err.descriptor(), Some(&descriptor));
        assert_eq!(
            err.to_string(),
            "Companion error: remote_failure (HTTP 500): HTTP 500"
        );
    }
}
