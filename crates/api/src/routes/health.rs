//! Liveness plus a registry reachability probe.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Always 200 so the process stays in rotation; `status` drops to
/// `degraded` while the registry cannot be read.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry_ok = match state.registry.count().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the subscriber registry");
            false
        }
    };

    Json(json!({
        "status": if registry_ok { "ok" } else { "degraded" },
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "registry": if registry_ok { "ok" } else { "unavailable" },
    }))
}
