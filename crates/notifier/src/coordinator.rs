//! Broadcast coordinator — fans one payload out to every registered subscriber.
//!
//! Each subscriber present when the run starts gets exactly one attempt.
//! Attempts are isolated: a failure never stops the others. Endpoints the
//! push service reports as gone are pruned from the registry; every other
//! failure is only recorded in the report.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use thiserror::Error;
use tokio::time::Instant;

use pushcast_common::error::AppError;
use pushcast_common::types::{BroadcastReport, DeliveryOutcome, Subscription, truncate_endpoint};

use crate::delivery::{DeliveryAdapter, DeliveryResult};
use crate::registry::{RegistryError, SubscriberRegistry};

/// Detail recorded for subscribers never attempted because the deadline passed.
pub const DEADLINE_EXCEEDED: &str = "deadline exceeded";

#[derive(Debug, Error)]
pub enum BroadcastError {
    /// Subscribers could not be listed; nothing was sent.
    #[error("subscriber registry unavailable: {0}")]
    StoreUnavailable(#[from] RegistryError),
}

impl From<BroadcastError> for AppError {
    fn from(err: BroadcastError) -> Self {
        match err {
            BroadcastError::StoreUnavailable(e) => AppError::StoreUnavailable(e.to_string()),
        }
    }
}

/// Per-attempt result before it is folded into the report.
struct Attempt {
    outcome: DeliveryOutcome,
    pruned: bool,
}

pub struct BroadcastCoordinator {
    registry: Arc<dyn SubscriberRegistry>,
    adapter: Arc<dyn DeliveryAdapter>,
    concurrency: usize,
}

impl BroadcastCoordinator {
    pub fn new(registry: Arc<dyn SubscriberRegistry>, adapter: Arc<dyn DeliveryAdapter>) -> Self {
        Self {
            registry,
            adapter,
            concurrency: 1,
        }
    }

    /// Allow up to `concurrency` deliveries in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Deliver `payload` to every registered subscriber.
    pub async fn broadcast(&self, payload: &[u8]) -> Result<BroadcastReport, BroadcastError> {
        self.run(payload, None).await
    }

    /// Like [`broadcast`](Self::broadcast), but stops starting new attempts once
    /// `deadline` has elapsed. Subscribers left over are reported as failed and
    /// kept in the registry.
    pub async fn broadcast_with_deadline(
        &self,
        payload: &[u8],
        deadline: Duration,
    ) -> Result<BroadcastReport, BroadcastError> {
        self.run(payload, Some(Instant::now() + deadline)).await
    }

    async fn run(
        &self,
        payload: &[u8],
        deadline: Option<Instant>,
    ) -> Result<BroadcastReport, BroadcastError> {
        let subscribers = self.registry.list_all().await?;
        let total_subscribers = subscribers.len();

        tracing::info!(
            total_subscribers,
            concurrency = self.concurrency,
            payload_bytes = payload.len(),
            "Starting broadcast"
        );

        let attempts: Vec<Attempt> = stream::iter(subscribers)
            .map(|subscriber| self.attempt(subscriber, payload, deadline))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let pruned = attempts.iter().filter(|a| a.pruned).count();
        let report = BroadcastReport {
            total_subscribers,
            outcomes: attempts.into_iter().map(|a| a.outcome).collect(),
            pruned,
        };

        tracing::info!(
            total_subscribers,
            succeeded = report.success_count(),
            failed = report.failure_count(),
            pruned,
            "Broadcast finished"
        );

        Ok(report)
    }

    async fn attempt(
        &self,
        subscriber: Subscription,
        payload: &[u8],
        deadline: Option<Instant>,
    ) -> Attempt {
        let endpoint = subscriber.endpoint;
        let short = truncate_endpoint(&endpoint);

        if deadline.is_some_and(|at| Instant::now() >= at) {
            return Attempt {
                outcome: DeliveryOutcome::failed(short, DEADLINE_EXCEEDED),
                pruned: false,
            };
        }

        let delivery = self.adapter.deliver(&endpoint, &subscriber.keys, payload);
        let result = match deadline {
            Some(at) => match tokio::time::timeout_at(at, delivery).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(endpoint = %short, "Broadcast deadline reached before delivery");
                    return Attempt {
                        outcome: DeliveryOutcome::failed(short, DEADLINE_EXCEEDED),
                        pruned: false,
                    };
                }
            },
            None => delivery.await,
        };

        match result {
            DeliveryResult::Delivered => {
                tracing::debug!(endpoint = %short, "Push delivered");
                Attempt {
                    outcome: DeliveryOutcome::success(short),
                    pruned: false,
                }
            }
            DeliveryResult::PermanentFailure { code } => {
                let pruned = match self.registry.remove(&endpoint).await {
                    Ok(true) => {
                        tracing::info!(endpoint = %short, code, "Pruned expired subscription");
                        true
                    }
                    Ok(false) => {
                        tracing::debug!(endpoint = %short, code, "Expired subscription already removed");
                        false
                    }
                    Err(e) => {
                        tracing::warn!(
                            endpoint = %short,
                            code,
                            error = %e,
                            "Failed to prune expired subscription"
                        );
                        false
                    }
                };
                Attempt {
                    outcome: DeliveryOutcome::failed(
                        short,
                        format!("subscription expired or no longer valid ({})", code),
                    ),
                    pruned,
                }
            }
            DeliveryResult::TransientFailure { detail } => {
                tracing::warn!(endpoint = %short, error = %detail, "Push delivery failed");
                Attempt {
                    outcome: DeliveryOutcome::failed(short, detail),
                    pruned: false,
                }
            }
        }
    }
}
