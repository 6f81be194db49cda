//! Push subscription routes.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use pushcast_common::error::AppError;
use pushcast_common::types::{Subscription, SubscriptionKeys, truncate_endpoint};

use crate::middleware::auth::ApiKeyAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/subscriptions",
            get(subscription_count)
                .post(register_subscription)
                .delete(unregister_subscription),
        )
        .route("/subscriptions/summary", get(subscription_summary))
}

#[derive(Debug, Deserialize)]
pub struct KeysInput {
    pub p256dh: Option<String>,
    pub auth: Option<String>,
}

/// Browser `PushSubscription.toJSON()` shape, plus an optional user agent.
#[derive(Debug, Deserialize)]
pub struct SubscriptionInput {
    pub endpoint: Option<String>,
    pub keys: Option<KeysInput>,
    #[serde(rename = "userAgent")]
    pub user_agent: Option<String>,
}

/// Accepts both `{endpoint, keys}` and `{subscription: {endpoint, keys}}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RegisterRequest {
    Envelope { subscription: SubscriptionInput },
    Bare(SubscriptionInput),
}

impl RegisterRequest {
    fn into_input(self) -> SubscriptionInput {
        match self {
            RegisterRequest::Envelope { subscription } => subscription,
            RegisterRequest::Bare(input) => input,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UnregisterRequest {
    pub endpoint: Option<String>,
}

fn required(value: Option<String>, message: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Validation(message.to_string()))
}

impl SubscriptionInput {
    fn into_subscription(self, header_user_agent: Option<String>) -> Result<Subscription, AppError> {
        let endpoint = required(self.endpoint, "Endpoint is required")?;
        let keys = self
            .keys
            .ok_or_else(|| AppError::Validation("Subscription keys are required".to_string()))?;
        let keys = SubscriptionKeys::new(
            required(keys.p256dh, "Subscription key 'p256dh' is required")?,
            required(keys.auth, "Subscription key 'auth' is required")?,
        );

        let user_agent = self
            .user_agent
            .filter(|ua| !ua.is_empty())
            .or(header_user_agent);

        Ok(Subscription::new(endpoint, keys, user_agent))
    }
}

/// POST /subscriptions — Register a subscription, or refresh the keys of a known endpoint.
async fn register_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = request?;
    let header_user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let subscription = request.into_input().into_subscription(header_user_agent)?;
    state.registry.upsert(&subscription).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Push subscription registered successfully",
        "publicKey": state.config.vapid.public_key,
    })))
}

/// DELETE /subscriptions — Remove a subscription. Unknown endpoints are not an error.
async fn unregister_subscription(
    State(state): State<AppState>,
    request: Result<Json<UnregisterRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = request?;
    let endpoint = required(request.endpoint, "Endpoint is required")?;
    let removed = state.registry.remove(&endpoint).await?;

    tracing::debug!(endpoint = %truncate_endpoint(&endpoint), removed, "Unregister request");

    Ok(Json(json!({
        "success": true,
        "message": "Push subscription unregistered successfully",
    })))
}

/// GET /subscriptions — Subscriber count and the VAPID public key browsers subscribe with.
async fn subscription_count(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.registry.count().await?;

    Ok(Json(json!({
        "count": count,
        "publicKey": state.config.vapid.public_key,
    })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberSummary {
    pub endpoint: String,
    pub keys: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummaryResponse {
    pub total_subscribers: usize,
    pub subscriptions: Vec<SubscriberSummary>,
}

/// GET /subscriptions/summary — Redacted listing of every subscriber.
async fn subscription_summary(
    State(state): State<AppState>,
    _auth: ApiKeyAuth,
) -> Result<Json<SubscriptionSummaryResponse>, AppError> {
    let subscriptions = state.registry.list_all().await?;

    let summaries = subscriptions
        .iter()
        .map(|sub| SubscriberSummary {
            endpoint: truncate_endpoint(&sub.endpoint),
            keys: if sub.keys.p256dh.is_empty() || sub.keys.auth.is_empty() {
                "missing"
            } else {
                "present"
            },
        })
        .collect();

    Ok(Json(SubscriptionSummaryResponse {
        total_subscribers: subscriptions.len(),
        subscriptions: summaries,
    }))
}
