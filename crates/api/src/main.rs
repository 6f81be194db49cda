//! Pushcast API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pushcast_common::config::AppConfig;
use pushcast_common::db::{create_pool, run_migrations};
use pushcast_notifier::{HolidayGate, PgSubscriberRegistry, WebPushDelivery};

use pushcast_api::routes::create_router;
use pushcast_api::state::AppState;

/// Upper bound on request bodies.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("pushcast_api=debug,pushcast_notifier=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Pushcast API server...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("BIND_ADDR is invalid: {}", e))?;

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let registry = Arc::new(PgSubscriberRegistry::new(pool));
    let adapter = Arc::new(WebPushDelivery::new(config.vapid.clone(), &config.broadcast)?);
    let holiday_gate = HolidayGate::from_config(config.calendar.as_ref())?;

    if holiday_gate.is_enabled() {
        tracing::info!("Holiday gate enabled for scheduled broadcasts");
    } else {
        tracing::info!("No holiday calendar configured; scheduled broadcasts always send");
    }

    // Build application state
    let state = AppState::new(registry, adapter, holiday_gate, config);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
