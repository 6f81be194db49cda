//! Shared application state for the Axum API server.

use std::sync::Arc;

use pushcast_common::config::AppConfig;
use pushcast_notifier::{BroadcastCoordinator, DeliveryAdapter, HolidayGate, SubscriberRegistry};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn SubscriberRegistry>,
    pub coordinator: Arc<BroadcastCoordinator>,
    pub holiday_gate: Arc<HolidayGate>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        registry: Arc<dyn SubscriberRegistry>,
        adapter: Arc<dyn DeliveryAdapter>,
        holiday_gate: HolidayGate,
        config: AppConfig,
    ) -> Self {
        let coordinator = BroadcastCoordinator::new(registry.clone(), adapter)
            .with_concurrency(config.broadcast.concurrency);

        Self {
            registry,
            coordinator: Arc::new(coordinator),
            holiday_gate: Arc::new(holiday_gate),
            config: Arc::new(config),
        }
    }
}
