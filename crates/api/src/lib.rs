//! Pushcast HTTP API.
//!
//! Endpoints:
//! - POST   /subscriptions          — Register or refresh a browser push subscription
//! - DELETE /subscriptions          — Unregister a subscription
//! - GET    /subscriptions          — Subscriber count + VAPID public key
//! - GET    /subscriptions/summary  — Redacted subscriber listing (API key)
//! - POST   /broadcast              — Send a notification to every subscriber (API key)
//! - POST   /broadcast/scheduled    — Holiday-gated broadcast for cron triggers (API key)
//! - GET    /health

pub mod middleware;
pub mod routes;
pub mod state;
