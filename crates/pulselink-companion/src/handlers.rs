//! Request handlers for every method the companion serves.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use pulselink_core::{
    Coordinates, HeartRateSample, LocationSample, RemoteReport, SettingsPatch, Snapshot,
    is_valid_heart_rate,
};
use pulselink_protocol::{ErrorDescriptor, methods};

use crate::error::PushError;
use crate::push::{PushReply, PushRequest, RemotePush};
use crate::registry::HandlerRegistry;
use crate::settings::SettingsManager;

type HandlerResult = Result<Value, ErrorDescriptor>;

/// Body sent by `TEST_CONNECTION`.
const PROBE_MESSAGE: &str = "pulselink connection test";

/// Readings most recently received from the device.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LastKnown {
    pub heart_rate: Option<u16>,
    pub location: Option<Coordinates>,
}

/// Forwards device readings to the remote API and serves settings.
pub struct SyncService {
    push: Arc<dyn RemotePush>,
    settings: SettingsManager,
    last_known: Mutex<LastKnown>,
}

impl SyncService {
    pub fn new(push: Arc<dyn RemotePush>, settings: SettingsManager) -> Arc<Self> {
        Arc::new(Self {
            push,
            settings,
            last_known: Mutex::new(LastKnown::default()),
        })
    }

    pub fn settings(&self) -> &SettingsManager {
        &self.settings
    }

    pub fn last_known(&self) -> LastKnown {
        *self.last_known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds a registry with every request method wired to this service.
    pub fn registry(self: &Arc<Self>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        self.register(&mut registry);
        registry
    }

    pub fn register(self: &Arc<Self>, registry: &mut HandlerRegistry) {
        self.route(registry, methods::SEND_HEART_RATE, |svc, p| async move {
            svc.send_heart_rate(p).await
        });
        self.route(registry, methods::SEND_LOCATION, |svc, p| async move {
            svc.send_location(p).await
        });
        self.route(registry, methods::SEND_DATA, |svc, p| async move {
            svc.send_snapshot(p).await
        });
        self.route(registry, methods::MANUAL_SYNC, |svc, p| async move {
            svc.send_snapshot(p).await
        });
        self.route(registry, methods::TEST_CONNECTION, |svc, p| async move {
            svc.test_connection(p).await
        });
        self.route(registry, methods::TEST_DATA_SEND, |svc, p| async move {
            svc.test_data_send(p).await
        });
        self.route(registry, methods::CHECK_NETWORK, |svc, _| async move {
            Ok::<_, ErrorDescriptor>(svc.check_network().await)
        });
        self.route(registry, methods::GET_SETTINGS, |svc, _| async move {
            Ok::<_, ErrorDescriptor>(json!({ "settings": svc.settings.current() }))
        });
        self.route(registry, methods::UPDATE_SETTINGS, |svc, p| async move {
            svc.update_settings(p)
        });
    }

    fn route<F, Fut>(self: &Arc<Self>, registry: &mut HandlerRegistry, method: &'static str, f: F)
    where
        F: Fn(Arc<Self>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let svc = Arc::clone(self);
        registry.register(method, move |params| f(Arc::clone(&svc), params));
    }

    async fn send_heart_rate(&self, params: Value) -> HandlerResult {
        let sample: HeartRateSample = parse_params(params)?;
        let bpm = valid_heart_rate(sample.value)?;
        let known = self.remember(Some(bpm), None);
        self.push_report(RemoteReport::new(Some(bpm), known.location))
            .await
    }

    async fn send_location(&self, params: Value) -> HandlerResult {
        let sample: LocationSample = parse_params(params)?;
        let coordinates = usable_coordinates(sample.coordinates())?;
        let known = self.remember(None, Some(coordinates));
        self.push_report(RemoteReport::new(known.heart_rate, Some(coordinates)))
            .await
    }

    /// `SEND_DATA` and `MANUAL_SYNC`: fills gaps from the last known readings.
    async fn send_snapshot(&self, params: Value) -> HandlerResult {
        let snapshot: Snapshot = parse_params(params)?;
        let heart_rate = snapshot.heart_rate.map(valid_heart_rate).transpose()?;
        let location = snapshot
            .location
            .map(usable_coordinates)
            .transpose()?;
        let known = self.remember(heart_rate, location);
        let report = RemoteReport::new(known.heart_rate, known.location);
        if report.is_empty() {
            return Err(ErrorDescriptor::invalid_params("no readings to sync"));
        }
        self.push_report(report).await
    }

    async fn test_connection(&self, params: Value) -> HandlerResult {
        let url = match params.get("apiUrl").and_then(Value::as_str) {
            Some(raw) => parse_http_url(raw)?,
            None => self.endpoint()?,
        };
        let body = json!({
            "test": true,
            "timestamp": now_rfc3339(),
            "message": PROBE_MESSAGE,
        });
        let reply = self.post(url, body).await?;
        Ok(json!({
            "connected": true,
            "status": reply.status,
            "body": reply.body,
        }))
    }

    async fn test_data_send(&self, params: Value) -> HandlerResult {
        let Value::Object(mut body) = params else {
            return Err(ErrorDescriptor::invalid_params("test data must be a JSON object"));
        };
        body.insert("timestamp".into(), json!(now_rfc3339()));
        body.insert(
            "deviceInfo".into(),
            json!({
                "source": "pulselink-companion",
                "version": env!("CARGO_PKG_VERSION"),
            }),
        );
        let url = self.endpoint()?;
        let reply = self.post(url, Value::Object(body)).await?;
        Ok(success(reply))
    }

    /// Never fails: any problem is reported as `disconnected`.
    async fn check_network(&self) -> Value {
        let connected = match self.settings.current().endpoint_url() {
            Some(url) => match self.push.probe(url).await {
                Ok(status) => {
                    debug!(status, "Endpoint reachable");
                    true
                }
                Err(e) => {
                    debug!(error = %e, "Endpoint unreachable");
                    false
                }
            },
            None => false,
        };
        json!({
            "status": if connected { "connected" } else { "disconnected" },
            "timestamp": now_rfc3339(),
        })
    }

    fn update_settings(&self, params: Value) -> HandlerResult {
        let patch: SettingsPatch = parse_params(params)?;
        let settings = self
            .settings
            .update(patch)
            .map_err(|e| ErrorDescriptor::internal(e.to_string()))?;
        Ok(json!({ "settings": settings }))
    }

    fn remember(&self, heart_rate: Option<u16>, location: Option<Coordinates>) -> LastKnown {
        let mut known = self.last_known.lock().unwrap_or_else(PoisonError::into_inner);
        if heart_rate.is_some() {
            known.heart_rate = heart_rate;
        }
        if location.is_some() {
            known.location = location;
        }
        *known
    }

    fn endpoint(&self) -> Result<Url, ErrorDescriptor> {
        self.settings
            .current()
            .endpoint_url()
            .ok_or_else(|| ErrorDescriptor::not_configured("API endpoint is not configured"))
    }

    async fn push_report(&self, report: RemoteReport) -> HandlerResult {
        let url = self.endpoint()?;
        let body = serde_json::to_value(&report)
            .map_err(|e| ErrorDescriptor::internal(e.to_string()))?;
        let reply = self.post(url, body).await?;
        info!(
            heart_rate = ?report.heart_rate,
            has_location = report.location.is_some(),
            status = reply.status,
            "Report pushed"
        );
        Ok(success(reply))
    }

    async fn post(&self, url: Url, body: Value) -> Result<PushReply, ErrorDescriptor> {
        let token = self.settings.current().auth_token;
        self.push
            .post(PushRequest::new(url, token, body))
            .await
            .map_err(push_failure)
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, ErrorDescriptor> {
    serde_json::from_value(params).map_err(|e| ErrorDescriptor::invalid_params(e.to_string()))
}

fn parse_http_url(raw: &str) -> Result<Url, ErrorDescriptor> {
    Url::parse(raw.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .ok_or_else(|| ErrorDescriptor::invalid_params(format!("not an http(s) URL: {}", raw)))
}

fn valid_heart_rate(bpm: u16) -> Result<u16, ErrorDescriptor> {
    if is_valid_heart_rate(bpm) {
        Ok(bpm)
    } else {
        Err(ErrorDescriptor::invalid_params(format!(
            "heart rate out of range: {}",
            bpm
        )))
    }
}

fn usable_coordinates(coordinates: Coordinates) -> Result<Coordinates, ErrorDescriptor> {
    if coordinates.in_range() && !coordinates.is_null_island() {
        Ok(coordinates)
    } else {
        Err(ErrorDescriptor::invalid_params(format!(
            "unusable coordinates: {}",
            coordinates
        )))
    }
}

fn push_failure(error: PushError) -> ErrorDescriptor {
    let descriptor = ErrorDescriptor::remote_failure(error.to_string());
    match error.http_status() {
        Some(status) => descriptor.with_status(status),
        None => descriptor,
    }
}

fn success(reply: PushReply) -> Value {
    json!({
        "status": "success",
        "result": reply.body,
        "httpStatus": reply.status,
    })
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::RecordingPush;
    use crate::settings::MemorySettingsStore;
    use pulselink_core::AppSettings;
    use pulselink_protocol::{ErrorCode, Outcome};

    const ENDPOINT: &str = "https://api.example.test/push";

    struct Fixture {
        push: Arc<RecordingPush>,
        service: Arc<SyncService>,
        registry: HandlerRegistry,
    }

    fn fixture(settings: AppSettings) -> Fixture {
        let push = Arc::new(RecordingPush::new());
        let manager = SettingsManager::load(MemorySettingsStore::new(settings)).unwrap();
        let service = SyncService::new(push.clone(), manager);
        let registry = service.registry();
        Fixture {
            push,
            service,
            registry,
        }
    }

    fn configured() -> Fixture {
        fixture(AppSettings::new(ENDPOINT, "tok"))
    }

    async fn call(f: &Fixture, method: &str, params: Value) -> Result<Value, ErrorDescriptor> {
        f.registry.dispatch(method, params).await.into_result()
    }

    #[test]
    fn every_request_method_is_registered() {
        let f = configured();
        let mut expected = methods::REQUEST_METHODS.to_vec();
        expected.sort_unstable();
        assert_eq!(f.registry.methods(), expected);
    }

    #[tokio::test]
    async fn heart_rate_is_pushed_with_token() {
        let f = configured();
        let result = call(&f, methods::SEND_HEART_RATE, json!({"value": 75, "timestamp": 0}))
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({"status": "success", "result": {"status": "ok"}, "httpStatus": 200})
        );

        let requests = f.push.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.as_str(), ENDPOINT);
        assert_eq!(requests[0].token, "tok");
        assert_eq!(requests[0].body, json!({"heart_rate": 75}));
    }

    #[tokio::test]
    async fn location_report_includes_last_heart_rate() {
        let f = configured();
        call(&f, methods::SEND_HEART_RATE, json!({"value": 80})).await.unwrap();
        call(
            &f,
            methods::SEND_LOCATION,
            json!({"latitude": 39.9042, "longitude": 116.4074}),
        )
        .await
        .unwrap();

        let requests = f.push.requests();
        assert_eq!(
            requests[1].body,
            json!({"heart_rate": 80, "location": {"lat": 39.9042, "lng": 116.4074}})
        );
        assert_eq!(f.service.last_known().heart_rate, Some(80));
    }

    #[tokio::test]
    async fn invalid_params_are_rejected_without_push() {
        let f = configured();
        for (method, params) in [
            (methods::SEND_HEART_RATE, json!({"value": "fast"})),
            (methods::SEND_HEART_RATE, json!({"value": 0})),
            (methods::SEND_LOCATION, json!({"latitude": 0.0, "longitude": 0.0})),
            (methods::SEND_LOCATION, json!({"latitude": 95.0, "longitude": 1.0})),
            (methods::MANUAL_SYNC, json!({})),
            (methods::MANUAL_SYNC, json!({"heartRate": 250})),
            (
                methods::SEND_DATA,
                json!({"heartRate": 0, "location": {"latitude": 1.0, "longitude": 2.0}}),
            ),
            (methods::TEST_DATA_SEND, json!([1, 2])),
        ] {
            let err = call(&f, method, params).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidParams, "{method}");
        }
        assert!(f.push.requests().is_empty());
    }

    #[tokio::test]
    async fn manual_sync_merges_last_known() {
        let f = configured();
        call(
            &f,
            methods::SEND_LOCATION,
            json!({"latitude": 48.85, "longitude": 2.35}),
        )
        .await
        .unwrap();
        call(&f, methods::MANUAL_SYNC, json!({"heartRate": 66})).await.unwrap();

        assert_eq!(
            f.push.requests()[1].body,
            json!({"heart_rate": 66, "location": {"lat": 48.85, "lng": 2.35}})
        );
    }

    #[tokio::test]
    async fn remote_rejection_carries_status() {
        let f = configured();
        f.push.push_reply(Err(PushError::status(401, "bad token")));
        let err = call(&f, methods::SEND_HEART_RATE, json!({"value": 70}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteFailure);
        assert_eq!(err.status, Some(401));
        assert_eq!(err.message, "HTTP 401: bad token");
    }

    #[tokio::test]
    async fn unconfigured_endpoint_is_reported() {
        let f = fixture(AppSettings::default());
        let err = call(&f, methods::SEND_HEART_RATE, json!({"value": 70}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotConfigured);

        let network = call(&f, methods::CHECK_NETWORK, json!({})).await.unwrap();
        assert_eq!(network["status"], "disconnected");
        assert!(network["timestamp"].is_string());
    }

    #[tokio::test]
    async fn check_network_reaches_endpoint() {
        let f = configured();
        let network = call(&f, methods::CHECK_NETWORK, Value::Null).await.unwrap();
        assert_eq!(network["status"], "connected");

        f.push.set_unreachable(true);
        let network = call(&f, methods::CHECK_NETWORK, Value::Null).await.unwrap();
        assert_eq!(network["status"], "disconnected");
    }

    #[tokio::test]
    async fn test_connection_prefers_explicit_url() {
        let f = configured();
        let result = call(
            &f,
            methods::TEST_CONNECTION,
            json!({"apiUrl": "http://localhost:8080/probe"}),
        )
        .await
        .unwrap();
        assert_eq!(result["connected"], true);
        assert_eq!(result["status"], 200);

        let request = &f.push.requests()[0];
        assert_eq!(request.url.as_str(), "http://localhost:8080/probe");
        assert_eq!(request.body["test"], true);
        assert_eq!(request.body["message"], PROBE_MESSAGE);

        let err = call(&f, methods::TEST_CONNECTION, json!({"apiUrl": "ftp://x"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn test_data_send_adds_metadata() {
        let f = configured();
        call(&f, methods::TEST_DATA_SEND, json!({"heart_rate": 90}))
            .await
            .unwrap();
        let body = &f.push.requests()[0].body;
        assert_eq!(body["heart_rate"], 90);
        assert!(body["timestamp"].is_string());
        assert_eq!(body["deviceInfo"]["source"], "pulselink-companion");
    }

    #[tokio::test]
    async fn settings_roundtrip() {
        let f = fixture(AppSettings::default());
        let mut changes = f.service.settings().subscribe();

        let updated = call(
            &f,
            methods::UPDATE_SETTINGS,
            json!({"apiEndpoint": ENDPOINT}),
        )
        .await
        .unwrap();
        assert_eq!(updated, json!({"settings": {"apiEndpoint": ENDPOINT, "authToken": ""}}));
        assert!(changes.has_changed().unwrap());

        let current = f.registry.dispatch(methods::GET_SETTINGS, Value::Null).await;
        assert_eq!(current, Outcome::success(updated));
    }
}
