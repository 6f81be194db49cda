use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Prefix length kept when endpoints are echoed back in reports.
const ENDPOINT_DISPLAY_LEN: usize = 50;

/// Client credentials from a browser `PushSubscription`, base64url encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriptionKeys {
    /// Client ECDH public key
    pub p256dh: String,
    /// Client authentication secret
    pub auth: String,
}

impl SubscriptionKeys {
    pub fn new(p256dh: impl Into<String>, auth: impl Into<String>) -> Self {
        Self {
            p256dh: p256dh.into(),
            auth: auth.into(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_base64url("p256dh", &self.p256dh)?;
        validate_base64url("auth", &self.auth)
    }
}

/// A registered push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub endpoint: String,
    #[sqlx(flatten)]
    pub keys: SubscriptionKeys,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        endpoint: impl Into<String>,
        keys: SubscriptionKeys,
        user_agent: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            endpoint: endpoint.into(),
            keys,
            user_agent,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the record before it reaches a registry.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.endpoint.trim().is_empty() {
            return Err(AppError::Validation("Endpoint is required".to_string()));
        }
        self.keys.validate()
    }
}

fn validate_base64url(field: &str, value: &str) -> Result<(), AppError> {
    let trimmed = value.trim_end_matches('=');
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!(
            "Subscription key '{}' is required",
            field
        )));
    }
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(AppError::Validation(format!(
            "Subscription key '{}' must be base64url encoded",
            field
        )));
    }
    Ok(())
}

/// Shorten an endpoint for logs and API responses.
pub fn truncate_endpoint(endpoint: &str) -> String {
    match endpoint.char_indices().nth(ENDPOINT_DISPLAY_LEN) {
        Some((idx, _)) => format!("{}...", &endpoint[..idx]),
        None => endpoint.to_string(),
    }
}

/// Result of delivering to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// One entry of a broadcast report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub endpoint: String,
    pub status: DeliveryStatus,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl DeliveryOutcome {
    pub fn success(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: DeliveryStatus::Success,
            error_detail: None,
        }
    }

    pub fn failed(endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: DeliveryStatus::Failed,
            error_detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }
}

/// Aggregate result of one broadcast run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    pub total_subscribers: usize,
    pub outcomes: Vec<DeliveryOutcome>,
    /// Registry entries removed because their endpoint is gone
    pub pruned: usize,
}

impl BroadcastReport {
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }
}

/// Notification content posted to the broadcast routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
