//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server.
//! State is backed by the in-memory registry and a scripted delivery adapter,
//! so no database or push service is needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use chrono_tz::Tz;
use tower::ServiceExt;

use pushcast_api::routes::create_router;
use pushcast_api::state::AppState;
use pushcast_common::config::{AppConfig, BroadcastConfig, CalendarFailurePolicy, VapidConfig};
use pushcast_common::types::{Subscription, SubscriptionKeys};
use pushcast_notifier::calendar::CalendarError;
use pushcast_notifier::{
    DeliveryAdapter, DeliveryResult, HolidayCalendar, HolidayGate, InMemoryRegistry,
    RegistryError, SubscriberRegistry,
};

// ============================================================
// Helpers
// ============================================================

const API_KEY: &str = "test-api-key";
const PUBLIC_KEY: &str = "BTestPublicKey";

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "unused".to_string(),
        db_max_connections: 1,
        bind_addr: "127.0.0.1:0".to_string(),
        api_key: API_KEY.to_string(),
        vapid: VapidConfig {
            public_key: PUBLIC_KEY.to_string(),
            private_key: "unused".to_string(),
            subject: "mailto:test@example.com".to_string(),
        },
        broadcast: BroadcastConfig {
            default_message: Some("Good morning".to_string()),
            ..Default::default()
        },
        calendar: None,
    }
}

/// Records every call; answers from a per-endpoint script, `Delivered` by default.
#[derive(Default)]
struct RecordingAdapter {
    script: HashMap<String, DeliveryResult>,
    payloads: Mutex<Vec<Vec<u8>>>,
    calls: AtomicUsize,
}

impl RecordingAdapter {
    fn with(mut self, endpoint: &str, result: DeliveryResult) -> Self {
        self.script.insert(endpoint.to_string(), result);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryAdapter for RecordingAdapter {
    async fn deliver(
        &self,
        endpoint: &str,
        _keys: &SubscriptionKeys,
        payload: &[u8],
    ) -> DeliveryResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.to_vec());
        self.script
            .get(endpoint)
            .cloned()
            .unwrap_or(DeliveryResult::Delivered)
    }
}

struct StaticCalendar(Result<usize, u16>);

#[async_trait]
impl HolidayCalendar for StaticCalendar {
    async fn events_on(&self, _day: NaiveDate, _tz: Tz) -> Result<usize, CalendarError> {
        self.0.map_err(|status| CalendarError::Status {
            status,
            body: String::new(),
        })
    }
}

/// Registry whose backing store is unreachable.
struct DownRegistry;

#[async_trait]
impl SubscriberRegistry for DownRegistry {
    async fn list_all(&self) -> Result<Vec<Subscription>, RegistryError> {
        Err(RegistryError::Unavailable(sqlx::Error::PoolTimedOut))
    }
    async fn upsert(&self, _: &Subscription) -> Result<(), RegistryError> {
        Err(RegistryError::Unavailable(sqlx::Error::PoolTimedOut))
    }
    async fn remove(&self, _: &str) -> Result<bool, RegistryError> {
        Err(RegistryError::Unavailable(sqlx::Error::PoolTimedOut))
    }
    async fn count(&self) -> Result<u64, RegistryError> {
        Err(RegistryError::Unavailable(sqlx::Error::PoolTimedOut))
    }
}

struct Harness {
    state: AppState,
    registry: Arc<InMemoryRegistry>,
    adapter: Arc<RecordingAdapter>,
}

fn harness_with(adapter: RecordingAdapter, gate: HolidayGate) -> Harness {
    let registry = Arc::new(InMemoryRegistry::new());
    let adapter = Arc::new(adapter);
    let state = AppState::new(registry.clone(), adapter.clone(), gate, test_config());
    Harness {
        state,
        registry,
        adapter,
    }
}

fn harness() -> Harness {
    harness_with(RecordingAdapter::default(), HolidayGate::disabled())
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = create_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    let mut request = json_request(method, uri, body);
    request
        .headers_mut()
        .insert("x-api-key", API_KEY.parse().unwrap());
    request
}

fn subscribe_body(endpoint: &str) -> serde_json::Value {
    serde_json::json!({
        "endpoint": endpoint,
        "keys": {"p256dh": "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA", "auth": "tBHItJI5svbpez7KI4CCXg"}
    })
}

async fn subscribe(state: &AppState, endpoint: &str) {
    let (status, _) = send(state, json_request("POST", "/subscriptions", subscribe_body(endpoint))).await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================
// Health + subscriptions
// ============================================================

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, json) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "pushcast-api");
    assert_eq!(json["registry"], "ok");
}

#[tokio::test]
async fn test_health_reports_unreachable_registry() {
    let state = AppState::new(
        Arc::new(DownRegistry),
        Arc::new(RecordingAdapter::default()),
        HolidayGate::disabled(),
        test_config(),
    );
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, json) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["registry"], "unavailable");
}

#[tokio::test]
async fn test_subscribe_returns_public_key() {
    let h = harness();

    let (status, json) = send(
        &h.state,
        json_request("POST", "/subscriptions", subscribe_body("https://push.example/a")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["publicKey"], PUBLIC_KEY);
    assert!(h.registry.contains("https://push.example/a").await);
}

#[tokio::test]
async fn test_resubscribe_keeps_single_record() {
    let h = harness();
    subscribe(&h.state, "https://push.example/a").await;
    subscribe(&h.state, "https://push.example/a").await;

    let (status, json) = send(
        &h.state,
        Request::builder().uri("/subscriptions").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["publicKey"], PUBLIC_KEY);
}

#[tokio::test]
async fn test_subscribe_envelope_and_user_agent_header() {
    let h = harness();
    let mut request = json_request(
        "POST",
        "/subscriptions",
        serde_json::json!({"subscription": subscribe_body("https://push.example/ua")}),
    );
    request
        .headers_mut()
        .insert("user-agent", "Mozilla/5.0 Test".parse().unwrap());

    let (status, _) = send(&h.state, request).await;
    assert_eq!(status, StatusCode::OK);

    let stored = h.registry.list_all().await.unwrap();
    assert_eq!(stored[0].user_agent.as_deref(), Some("Mozilla/5.0 Test"));
}

#[tokio::test]
async fn test_subscribe_without_endpoint_is_bad_request() {
    let h = harness();

    let (status, json) = send(
        &h.state,
        json_request(
            "POST",
            "/subscriptions",
            serde_json::json!({"keys": {"p256dh": "BPk", "auth": "au"}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Endpoint is required");
    assert_eq!(h.registry.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_subscribe_with_malformed_keys_is_bad_request() {
    let h = harness();

    let (status, _) = send(
        &h.state,
        json_request(
            "POST",
            "/subscriptions",
            serde_json::json!({"endpoint": "https://push.example/a", "keys": {"p256dh": "a+b/c", "auth": "au"}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_subscription_body_is_json_error() {
    let h = harness();

    let request = Request::builder()
        .method("POST")
        .uri("/subscriptions")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send(&h.state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());

    let request = Request::builder()
        .method("DELETE")
        .uri("/subscriptions")
        .body(Body::from(r#"{"endpoint":"https://push.example/a"}"#))
        .unwrap();
    let (status, json) = send(&h.state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());

    assert_eq!(h.registry.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unsubscribe() {
    let h = harness();
    subscribe(&h.state, "https://push.example/a").await;

    let (status, json) = send(
        &h.state,
        json_request(
            "DELETE",
            "/subscriptions",
            serde_json::json!({"endpoint": "https://push.example/a"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(h.registry.count().await.unwrap(), 0);

    // Unknown endpoint is not an error
    let (status, _) = send(
        &h.state,
        json_request(
            "DELETE",
            "/subscriptions",
            serde_json::json!({"endpoint": "https://push.example/a"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Missing endpoint is
    let (status, _) = send(
        &h.state,
        json_request("DELETE", "/subscriptions", serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_summary_requires_api_key_and_redacts() {
    let h = harness();
    let long = format!("https://fcm.googleapis.com/fcm/send/{}", "x".repeat(80));
    subscribe(&h.state, &long).await;

    let (status, _) = send(
        &h.state,
        Request::builder()
            .uri("/subscriptions/summary")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = send(
        &h.state,
        Request::builder()
            .uri("/subscriptions/summary")
            .header("x-api-key", API_KEY)
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["totalSubscribers"], 1);
    let entry = &json["subscriptions"][0];
    assert!(entry["endpoint"].as_str().unwrap().ends_with("..."));
    assert_eq!(entry["keys"], "present");
}

// ============================================================
// Broadcast
// ============================================================

#[tokio::test]
async fn test_broadcast_without_api_key_makes_no_deliveries() {
    let h = harness();
    subscribe(&h.state, "https://push.example/a").await;

    let (status, _) = send(
        &h.state,
        json_request("POST", "/broadcast", serde_json::json!({"body": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut wrong = json_request("POST", "/broadcast", serde_json::json!({"body": "hi"}));
    wrong
        .headers_mut()
        .insert("x-api-key", "nope".parse().unwrap());
    let (status, _) = send(&h.state, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(h.adapter.calls(), 0);
}

#[tokio::test]
async fn test_broadcast_prunes_gone_endpoints() {
    let adapter = RecordingAdapter::default()
        .with("https://push.example/b", DeliveryResult::PermanentFailure { code: 410 });
    let h = harness_with(adapter, HolidayGate::disabled());
    for endpoint in ["https://push.example/a", "https://push.example/b", "https://push.example/c"] {
        subscribe(&h.state, endpoint).await;
    }

    let (status, json) = send(
        &h.state,
        authed("POST", "/broadcast", serde_json::json!({"body": "Stand-up in 10"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["totalSubscribers"], 3);
    assert_eq!(json["message"], "Push notifications sent to 2 subscribers");

    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    let failed: Vec<_> = results.iter().filter(|r| r["status"] == "failed").collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["endpoint"], "https://push.example/b");
    assert!(failed[0]["error"].is_string());

    assert!(!h.registry.contains("https://push.example/b").await);
    assert_eq!(h.registry.count().await.unwrap(), 2);
    assert_eq!(
        h.adapter.payloads.lock().unwrap()[0],
        b"Stand-up in 10".to_vec()
    );
}

#[tokio::test]
async fn test_broadcast_transient_failures_keep_everyone() {
    let adapter = RecordingAdapter::default()
        .with("https://push.example/a", DeliveryResult::transient("429"))
        .with("https://push.example/b", DeliveryResult::transient("reset"));
    let h = harness_with(adapter, HolidayGate::disabled());
    subscribe(&h.state, "https://push.example/a").await;
    subscribe(&h.state, "https://push.example/b").await;

    let (status, json) = send(&h.state, authed("POST", "/broadcast", serde_json::json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Push notifications sent to 0 subscribers");
    assert_eq!(h.registry.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_broadcast_plain_text_body() {
    let h = harness();
    subscribe(&h.state, "https://push.example/a").await;

    let request = Request::builder()
        .method("POST")
        .uri("/broadcast")
        .header("x-api-key", API_KEY)
        .header("content-type", "text/plain")
        .body(Body::from("Plain message"))
        .unwrap();
    let (status, _) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.adapter.payloads.lock().unwrap()[0], b"Plain message".to_vec());
}

#[tokio::test]
async fn test_broadcast_empty_registry() {
    let h = harness();

    let (status, json) = send(&h.state, authed("POST", "/broadcast", serde_json::json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["totalSubscribers"], 0);
    assert_eq!(json["results"], serde_json::json!([]));
}

// ============================================================
// Scheduled (holiday-gated) broadcast
// ============================================================

fn gate(calendar: StaticCalendar, policy: CalendarFailurePolicy) -> HolidayGate {
    HolidayGate::new(Arc::new(calendar), chrono_tz::Asia::Seoul, policy)
}

#[tokio::test]
async fn test_scheduled_broadcast_skips_on_holiday() {
    let h = harness_with(
        RecordingAdapter::default(),
        gate(StaticCalendar(Ok(1)), CalendarFailurePolicy::FailOpen),
    );
    subscribe(&h.state, "https://push.example/a").await;

    let (status, json) = send(
        &h.state,
        authed("POST", "/broadcast/scheduled", serde_json::json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["skipped"], true);
    assert!(json["reason"].as_str().unwrap().contains("holiday"));
    assert_eq!(h.adapter.calls(), 0);
}

#[tokio::test]
async fn test_scheduled_broadcast_uses_default_message() {
    let h = harness_with(
        RecordingAdapter::default(),
        gate(StaticCalendar(Ok(0)), CalendarFailurePolicy::FailClosed),
    );
    subscribe(&h.state, "https://push.example/a").await;

    let request = Request::builder()
        .method("POST")
        .uri("/broadcast/scheduled")
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&h.state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json.get("skipped").is_none());
    assert_eq!(json["totalSubscribers"], 1);
    assert_eq!(h.adapter.payloads.lock().unwrap()[0], b"Good morning".to_vec());
}

#[tokio::test]
async fn test_scheduled_broadcast_calendar_failure_policy() {
    // Fail closed: skip
    let h = harness_with(
        RecordingAdapter::default(),
        gate(StaticCalendar(Err(500)), CalendarFailurePolicy::FailClosed),
    );
    subscribe(&h.state, "https://push.example/a").await;
    let (_, json) = send(
        &h.state,
        authed("POST", "/broadcast/scheduled", serde_json::json!({})),
    )
    .await;
    assert_eq!(json["skipped"], true);
    assert_eq!(h.adapter.calls(), 0);

    // Fail open: send, with the calendar problem noted
    let h = harness_with(
        RecordingAdapter::default(),
        gate(StaticCalendar(Err(500)), CalendarFailurePolicy::FailOpen),
    );
    subscribe(&h.state, "https://push.example/a").await;
    let (_, json) = send(
        &h.state,
        authed("POST", "/broadcast/scheduled", serde_json::json!({})),
    )
    .await;
    assert!(json.get("skipped").is_none());
    assert!(json["reason"].as_str().unwrap().contains("sending anyway"));
    assert_eq!(h.adapter.calls(), 1);
}

#[tokio::test]
async fn test_scheduled_broadcast_requires_api_key() {
    let h = harness();
    subscribe(&h.state, "https://push.example/a").await;

    let (status, _) = send(
        &h.state,
        json_request("POST", "/broadcast/scheduled", serde_json::json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.adapter.calls(), 0);
}
