//! Shared-secret authentication for operator routes.
//!
//! Broadcast and diagnostic routes require an `X-API-Key` header matching
//! `AppConfig::api_key`. The check runs as an extractor, so a rejected
//! request never reaches the handler body.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;

use pushcast_common::error::AppError;

use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Marker extractor proving the request carried the shared secret.
///
/// ```ignore
/// async fn handler(_auth: ApiKeyAuth) -> impl IntoResponse { /* ... */ }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ApiKeyAuth;

/// Constant-time comparison of a presented key against the configured one.
pub fn verify_api_key(provided: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());

        match provided {
            Some(key) if verify_api_key(key, &state.config.api_key) => Ok(ApiKeyAuth),
            Some(_) => {
                tracing::warn!(path = %parts.uri.path(), "Rejected request with invalid API key");
                Err(AppError::Auth("Unauthorized".to_string()))
            }
            None => Err(AppError::Auth(
                "Missing X-API-Key header".to_string(),
            )),
        }
    }
}
