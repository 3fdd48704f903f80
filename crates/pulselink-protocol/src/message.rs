//! Message model shared by both endpoints.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier carried by every message.
///
/// Requests get a fresh, strictly increasing id from their sender and the
/// matching response echoes it. Call ids only help when reading logs.
pub type MessageId = u64;

/// The three message shapes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Call,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Call => "call",
        })
    }
}

/// A unit exchanged over a link.
///
/// ```rust
/// use pulselink_protocol::{Message, Outcome};
/// use serde_json::json;
///
/// let request = Message::request(1, "SEND_HEART_RATE", json!({"value": 75}));
/// let response = Message::response(request.id(), Outcome::success(json!({"ok": true})));
/// assert_eq!(response.id(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// A call expecting exactly one response.
    Request { id: MessageId, payload: Invocation },
    /// The answer to the request with the same id.
    Response { id: MessageId, payload: Outcome },
    /// Fire-and-forget push.
    Call { id: MessageId, payload: Invocation },
}

impl Message {
    /// Creates a request message.
    pub fn request(id: MessageId, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id,
            payload: Invocation::new(method, params),
        }
    }

    /// Creates a response message.
    pub fn response(id: MessageId, outcome: Outcome) -> Self {
        Self::Response {
            id,
            payload: outcome,
        }
    }

    /// Creates a call (push) message.
    pub fn call(id: MessageId, method: impl Into<String>, params: Value) -> Self {
        Self::Call {
            id,
            payload: Invocation::new(method, params),
        }
    }

    pub fn id(&self) -> MessageId {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } | Self::Call { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Request { .. } => MessageKind::Request,
            Self::Response { .. } => MessageKind::Response,
            Self::Call { .. } => MessageKind::Call,
        }
    }

    /// Method name for requests and calls.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { payload, .. } | Self::Call { payload, .. } => Some(&payload.method),
            Self::Response { .. } => None,
        }
    }
}

/// Method name plus parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Invocation {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Result of a request: a value, or a structured error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        #[serde(default)]
        result: Value,
    },
    Failure {
        error: ErrorDescriptor,
    },
}

impl Outcome {
    pub fn success(result: Value) -> Self {
        Self::Success { result }
    }

    pub fn failure(error: ErrorDescriptor) -> Self {
        Self::Failure { error }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Converts into a `Result`, consuming the outcome.
    pub fn into_result(self) -> Result<Value, ErrorDescriptor> {
        match self {
            Self::Success { result } => Ok(result),
            Self::Failure { error } => Err(error),
        }
    }
}

impl From<Result<Value, ErrorDescriptor>> for Outcome {
    fn from(result: Result<Value, ErrorDescriptor>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(error) => Self::failure(error),
        }
    }
}

/// Error categories a companion can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No handler is registered for the method.
    MethodNotSupported,
    /// Parameters did not match what the method expects.
    InvalidParams,
    /// The remote HTTP endpoint refused or failed the push.
    RemoteFailure,
    /// The companion lacks the settings needed to serve the request.
    NotConfigured,
    /// Generic failure without a more specific category.
    RequestFailed,
    /// Bug or unexpected state on the companion.
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MethodNotSupported => "method_not_supported",
            Self::InvalidParams => "invalid_params",
            Self::RemoteFailure => "remote_failure",
            Self::NotConfigured => "not_configured",
            Self::RequestFailed => "request_failed",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried by a failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status involved in the failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorDescriptor {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
        }
    }

    pub fn method_not_supported(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotSupported,
            format!("method not supported: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn remote_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RemoteFailure, message)
    }

    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotConfigured, message)
    }

    pub fn request_failed() -> Self {
        Self::new(ErrorCode::RequestFailed, "request failed")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Builder: attach an HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.code, status, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ErrorDescriptor {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_format() {
        let message = Message::request(1, "SEND_HEART_RATE", json!({"value": 75}));
        let json = serde_json::to_string(&message).unwrap();
        insta::assert_snapshot!(json, @r#"{"kind":"request","id":1,"payload":{"method":"SEND_HEART_RATE","params":{"value":75}}}"#);
    }

    #[test]
    fn success_response_wire_format() {
        let message = Message::response(3, Outcome::success(json!({"dataId": "d1"})));
        let json = serde_json::to_string(&message).unwrap();
        insta::assert_snapshot!(json, @r#"{"kind":"response","id":3,"payload":{"status":"success","result":{"dataId":"d1"}}}"#);
    }

    #[test]
    fn failure_response_wire_format() {
        let error = ErrorDescriptor::remote_failure("HTTP 401: bad token").with_status(401);
        let message = Message::response(4, Outcome::failure(error));
        let json = serde_json::to_string(&message).unwrap();
        insta::assert_snapshot!(json, @r#"{"kind":"response","id":4,"payload":{"status":"failure","error":{"code":"remote_failure","message":"HTTP 401: bad token","status":401}}}"#);
    }

    #[test]
    fn call_without_params_defaults_to_null() {
        let message: Message =
            serde_json::from_str(r#"{"kind":"call","id":9,"payload":{"method":"PING"}}"#).unwrap();
        assert_eq!(message.kind(), MessageKind::Call);
        assert_eq!(message.method(), Some("PING"));
        assert_eq!(message, Message::call(9, "PING", Value::Null));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result = serde_json::from_str::<Message>(
            r#"{"kind":"notify","id":1,"payload":{"method":"X"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn outcome_into_result() {
        assert_eq!(Outcome::success(json!(1)).into_result().unwrap(), json!(1));
        let err = Outcome::failure(ErrorDescriptor::request_failed())
            .into_result()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RequestFailed);
    }

    #[test]
    fn descriptor_display() {
        let plain = ErrorDescriptor::method_not_supported("NOPE");
        assert_eq!(
            plain.to_string(),
            "method_not_supported: method not supported: NOPE"
        );

        let with_status = ErrorDescriptor::remote_failure("down").with_status(503);
        assert_eq!(with_status.to_string(), "remote_failure (HTTP 503): down");
    }
}
