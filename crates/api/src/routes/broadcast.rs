//! Broadcast routes — manual and scheduled (holiday-gated) fan-out.
//!
//! Both routes share one payload decoder and hand off to the same
//! `BroadcastCoordinator`.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use pushcast_common::error::AppError;
use pushcast_common::types::{BroadcastReport, DeliveryOutcome, NotificationPayload};

use crate::middleware::auth::ApiKeyAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/broadcast", post(broadcast))
        .route("/broadcast/scheduled", post(scheduled_broadcast))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<DeliveryOutcome>,
    pub total_subscribers: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<BroadcastReport> for BroadcastResponse {
    fn from(report: BroadcastReport) -> Self {
        Self {
            success: true,
            message: format!(
                "Push notifications sent to {} subscribers",
                report.success_count()
            ),
            total_subscribers: report.total_subscribers,
            results: report.outcomes,
            skipped: false,
            reason: None,
        }
    }
}

/// Turn a request body into the bytes pushed to browsers.
///
/// - JSON object with only `body` → that text, matching what service workers
///   read through `event.data.text()`
/// - JSON object with `title`, `icon` or `url` → the object re-serialized
/// - JSON string → the string
/// - anything else → sent verbatim as plain text
pub fn decode_payload(headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>, AppError> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    if !is_json {
        return Ok(body.to_vec());
    }

    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))?;

    match value {
        serde_json::Value::String(text) => Ok(text.into_bytes()),
        serde_json::Value::Object(_) => {
            let payload: NotificationPayload = serde_json::from_value(value)
                .map_err(|e| AppError::Validation(format!("Invalid notification: {}", e)))?;

            if payload.title.is_none() && payload.icon.is_none() && payload.url.is_none() {
                return Ok(payload.body.unwrap_or_default().into_bytes());
            }

            serde_json::to_vec(&payload).map_err(|e| AppError::Internal(e.to_string()))
        }
        _ => Err(AppError::Validation(
            "Body must be a JSON object, a JSON string or plain text".to_string(),
        )),
    }
}

async fn run_broadcast(state: &AppState, payload: &[u8]) -> Result<BroadcastReport, AppError> {
    let report = match state.config.broadcast.deadline_secs {
        Some(secs) => {
            state
                .coordinator
                .broadcast_with_deadline(payload, Duration::from_secs(secs))
                .await?
        }
        None => state.coordinator.broadcast(payload).await?,
    };
    Ok(report)
}

/// POST /broadcast — Send one notification to every subscriber.
async fn broadcast(
    State(state): State<AppState>,
    _auth: ApiKeyAuth,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BroadcastResponse>, AppError> {
    let payload = decode_payload(&headers, &body)?;
    let report = run_broadcast(&state, &payload).await?;

    Ok(Json(report.into()))
}

/// POST /broadcast/scheduled — Cron entry point. Skips the run on holidays.
async fn scheduled_broadcast(
    State(state): State<AppState>,
    _auth: ApiKeyAuth,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BroadcastResponse>, AppError> {
    let mut payload = decode_payload(&headers, &body)?;
    if payload.is_empty()
        && let Some(default) = &state.config.broadcast.default_message
    {
        payload = default.clone().into_bytes();
    }

    let decision = state.holiday_gate.check(Utc::now()).await;
    if !decision.should_send() {
        tracing::info!(reason = ?decision.reason(), "Scheduled broadcast skipped");
        return Ok(Json(BroadcastResponse {
            success: true,
            message: "Scheduled broadcast skipped".to_string(),
            results: Vec::new(),
            total_subscribers: 0,
            skipped: true,
            reason: decision.reason(),
        }));
    }

    let report = run_broadcast(&state, &payload).await?;
    let mut response = BroadcastResponse::from(report);
    response.reason = decision.reason();

    Ok(Json(response))
}
