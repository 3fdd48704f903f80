//! Boundary to the remote HTTP API that receives readings.
//!
//! The companion only ever talks to the remote side through [`RemotePush`], so
//! handlers can be exercised against [`RecordingPush`] without a network.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::error::{PushError, PushResult};

/// A boxed future, so the trait stays object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// User-Agent sent with every remote request.
pub const USER_AGENT: &str = concat!("pulselink/", env!("CARGO_PKG_VERSION"));

/// One JSON POST to the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub url: Url,
    /// Bearer token; omitted from the request when blank.
    pub token: String,
    pub body: Value,
}

impl PushRequest {
    pub fn new(url: Url, token: impl Into<String>, body: Value) -> Self {
        Self {
            url,
            token: token.into(),
            body,
        }
    }
}

/// A 2xx answer from the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct PushReply {
    pub status: u16,
    /// Parsed JSON body, or the raw text as a string when it is not JSON.
    pub body: Value,
}

/// Sends reports to the remote API.
pub trait RemotePush: Send + Sync {
    /// POSTs `request.body` as JSON. Non-2xx answers are [`PushError::Status`].
    fn post(&self, request: PushRequest) -> BoxFuture<'_, PushResult<PushReply>>;

    /// Checks that `url` answers at all. Any HTTP status counts as reachable.
    fn probe(&self, url: Url) -> BoxFuture<'_, PushResult<u16>>;
}

/// [`RemotePush`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPushClient {
    http_client: reqwest::Client,
}

impl HttpPushClient {
    /// Creates a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> PushResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PushError::network(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }
}

fn map_send_error(e: reqwest::Error) -> PushError {
    if e.is_timeout() {
        PushError::network("request timeout")
    } else if e.is_connect() {
        PushError::network(format!("connection failed: {}", e))
    } else {
        PushError::network(format!("request failed: {}", e))
    }
}

/// Parses a response body, keeping non-JSON text as a string.
fn parse_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Error message for a failed request: the body's `message` field if present.
fn failure_message(body: &Value, status: u16) -> String {
    match body {
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Value::String(text) => text.clone(),
        Value::Null => reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("request failed")
            .to_string(),
        other => other.to_string(),
    }
}

impl RemotePush for HttpPushClient {
    fn post(&self, request: PushRequest) -> BoxFuture<'_, PushResult<PushReply>> {
        Box::pin(async move {
            let mut builder = self.http_client.post(request.url.clone()).json(&request.body);
            if !request.token.trim().is_empty() {
                builder = builder.bearer_auth(&request.token);
            }

            let response = builder.send().await.map_err(map_send_error)?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| PushError::network(format!("failed to read response: {}", e)))?;
            let body = parse_body(text);

            if !status.is_success() {
                let message = failure_message(&body, status.as_u16());
                warn!(url = %request.url, status = status.as_u16(), %message, "Remote push rejected");
                return Err(PushError::status(status.as_u16(), message));
            }

            debug!(url = %request.url, status = status.as_u16(), "Remote push accepted");
            Ok(PushReply {
                status: status.as_u16(),
                body,
            })
        })
    }

    fn probe(&self, url: Url) -> BoxFuture<'_, PushResult<u16>> {
        Box::pin(async move {
            let response = self.http_client.get(url).send().await.map_err(map_send_error)?;
            Ok(response.status().as_u16())
        })
    }
}

/// In-memory [`RemotePush`] that records requests and replays scripted answers.
///
/// Without a script every POST answers `200 {"status":"ok"}` and every probe
/// answers `200`.
#[derive(Debug, Default)]
pub struct RecordingPush {
    requests: Mutex<Vec<PushRequest>>,
    replies: Mutex<VecDeque<PushResult<PushReply>>>,
    unreachable: Mutex<bool>,
}

impl RecordingPush {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the answer for the next POST.
    pub fn push_reply(&self, reply: PushResult<PushReply>) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Makes probes fail with a network error.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap_or_else(PoisonError::into_inner) = unreachable;
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<PushRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RemotePush for RecordingPush {
    fn post(&self, request: PushRequest) -> BoxFuture<'_, PushResult<PushReply>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Ok(PushReply {
                    status: 200,
                    body: json!({"status": "ok"}),
                })
            });
        Box::pin(async move { reply })
    }

    fn probe(&self, url: Url) -> BoxFuture<'_, PushResult<u16>> {
        let unreachable = *self.unreachable.lock().unwrap_or_else(PoisonError::into_inner);
        Box::pin(async move {
            if unreachable {
                Err(PushError::network(format!("connection failed: {}", url)))
            } else {
                Ok(200)
            }
        })
    }
}
