//! Subscriber registry — the set of active push subscriptions keyed by endpoint.
//!
//! Every call goes to the backing store; no caching layer sits in between.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;

use pushcast_common::error::AppError;
use pushcast_common::types::{Subscription, truncate_endpoint};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid subscription: {0}")]
    Invalid(String),

    #[error("subscription store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Invalid(msg) => AppError::Validation(msg),
            RegistryError::Unavailable(e) => AppError::StoreUnavailable(e.to_string()),
        }
    }
}

/// Storage-agnostic access to registered subscriptions.
#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    /// Every registered subscription, in no particular order.
    async fn list_all(&self) -> Result<Vec<Subscription>, RegistryError>;

    /// Insert, or overwrite keys and user agent of an existing endpoint.
    async fn upsert(&self, subscription: &Subscription) -> Result<(), RegistryError>;

    /// Delete by endpoint. Returns `false` when nothing was registered under it.
    async fn remove(&self, endpoint: &str) -> Result<bool, RegistryError>;

    async fn count(&self) -> Result<u64, RegistryError>;
}

fn validate(subscription: &Subscription) -> Result<(), RegistryError> {
    subscription.validate().map_err(|e| match e {
        AppError::Validation(msg) => RegistryError::Invalid(msg),
        other => RegistryError::Invalid(other.to_string()),
    })
}

/// PostgreSQL-backed registry over the `push_subscriptions` table.
#[derive(Clone)]
pub struct PgSubscriberRegistry {
    pool: PgPool,
}

impl PgSubscriberRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriberRegistry for PgSubscriberRegistry {
    async fn list_all(&self) -> Result<Vec<Subscription>, RegistryError> {
        let subs: Vec<Subscription> = sqlx::query_as(
            r#"
            SELECT endpoint, p256dh, auth, user_agent, created_at, updated_at
            FROM push_subscriptions
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }

    async fn upsert(&self, subscription: &Subscription) -> Result<(), RegistryError> {
        validate(subscription)?;

        sqlx::query(
            r#"
            INSERT INTO push_subscriptions (endpoint, p256dh, auth, user_agent)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (endpoint) DO UPDATE
            SET p256dh = EXCLUDED.p256dh,
                auth = EXCLUDED.auth,
                user_agent = EXCLUDED.user_agent,
                updated_at = now()
            "#,
        )
        .bind(&subscription.endpoint)
        .bind(&subscription.keys.p256dh)
        .bind(&subscription.keys.auth)
        .bind(&subscription.user_agent)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            endpoint = %truncate_endpoint(&subscription.endpoint),
            "Subscription upserted"
        );

        Ok(())
    }

    async fn remove(&self, endpoint: &str) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = $1")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(
                endpoint = %truncate_endpoint(endpoint),
                "Subscription removed"
            );
        }

        Ok(deleted)
    }

    async fn count(&self) -> Result<u64, RegistryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM push_subscriptions")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }
}

/// Process-local registry, used in tests and for running without a database.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<String, Subscription>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, endpoint: &str) -> bool {
        self.entries.read().await.contains_key(endpoint)
    }
}

#[async_trait]
impl SubscriberRegistry for InMemoryRegistry {
    async fn list_all(&self) -> Result<Vec<Subscription>, RegistryError> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn upsert(&self, subscription: &Subscription) -> Result<(), RegistryError> {
        validate(subscription)?;

        let mut entries = self.entries.write().await;
        match entries.get_mut(&subscription.endpoint) {
            Some(existing) => {
                existing.keys = subscription.keys.clone();
                existing.user_agent = subscription.user_agent.clone();
                existing.updated_at = Utc::now();
            }
            None => {
                entries.insert(subscription.endpoint.clone(), subscription.clone());
            }
        }
        Ok(())
    }

    async fn remove(&self, endpoint: &str) -> Result<bool, RegistryError> {
        Ok(self.entries.write().await.remove(endpoint).is_some())
    }

    async fn count(&self) -> Result<u64, RegistryError> {
        Ok(self.entries.read().await.len() as u64)
    }
}
