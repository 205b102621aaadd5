//! # Broadcast Fan-out
//!
//! Delivers one cycle's payload to every registered connection.
//!
//! ## Core Design Principles:
//!
//! 1.  **Serialize once**: the payload is encoded to JSON a single time and
//!     wrapped in `Bytes`. Every recipient receives a clone of the same
//!     reference-counted buffer, never a copy of the data.
//!
//! 2.  **Independent delivery**: sends run concurrently and one recipient's
//!     failure never aborts delivery to the others. Nothing is queued or
//!     retried here; a missed payload is simply missed.
//!
//! 3.  **Stale pruning**: a recipient reported as gone is removed from the
//!     connection registry. Any other failure is logged and left alone.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;

use crate::connections::state_store::StoreError;
use crate::core::registry::ConnectionRegistry;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The whole payload was handed to the connection.
    Delivered,
    /// The connection no longer exists.
    Gone,
    /// Any other failure.
    Failed(String),
}

/// The push-delivery boundary of the hosting channel.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Sends one complete message to `connection_id`.
    async fn send(&self, connection_id: &str, payload: Bytes) -> DeliveryOutcome;
}

/// Errors that prevent a broadcast from starting.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The payload could not be encoded.
    #[error("Failed to serialize broadcast payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The recipient list could not be read.
    #[error("Failed to read connection registry: {0}")]
    Registry(#[from] StoreError),
}

/// Per-recipient outcome of one broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Outcome keyed by connection id.
    pub outcomes: BTreeMap<String, DeliveryOutcome>,
    /// Connections removed from the registry because they were gone.
    pub pruned: usize,
}

impl BroadcastReport {
    /// Number of recipients that received the payload.
    pub fn delivered(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| **o == DeliveryOutcome::Delivered)
            .count()
    }
}

/// Fan-out over the registry of one stream.
#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
    channel: Arc<dyn PushChannel>,
}

impl Broadcaster {
    /// Pairs a connection registry with the channel that reaches its members.
    pub fn new(registry: ConnectionRegistry, channel: Arc<dyn PushChannel>) -> Self {
        Self { registry, channel }
    }

    /// The registry this broadcaster reads recipients from.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Sends `payload` to every currently registered connection.
    pub async fn broadcast<P: Serialize + ?Sized>(
        &self,
        payload: &P,
    ) -> Result<BroadcastReport, DispatchError> {
        let recipients = self.registry.list_all().await?;
        self.broadcast_to(payload, &recipients).await
    }

    /// Sends `payload` to each of `recipients`, pruning the gone ones.
    pub async fn broadcast_to<P: Serialize + ?Sized>(
        &self,
        payload: &P,
        recipients: &BTreeSet<String>,
    ) -> Result<BroadcastReport, DispatchError> {
        let frame = Bytes::from(serde_json::to_vec(payload)?);

        let sends = recipients.iter().map(|id| {
            let frame = frame.clone();
            async move { (id.clone(), self.channel.send(id, frame).await) }
        });
        let outcomes: BTreeMap<String, DeliveryOutcome> = join_all(sends).await.into_iter().collect();

        let mut report = BroadcastReport {
            outcomes,
            pruned: 0,
        };
        for (id, outcome) in &report.outcomes {
            match outcome {
                DeliveryOutcome::Delivered => {}
                DeliveryOutcome::Gone => match self.registry.unregister(id).await {
                    Ok(()) => {
                        log::info!("Connection '{}' is gone. Removed from registry.", id);
                        report.pruned += 1;
                    }
                    Err(e) => log::warn!("Failed to prune gone connection '{}': {}", id, e),
                },
                DeliveryOutcome::Failed(reason) => {
                    log::warn!("Delivery to '{}' failed: {}", id, reason);
                }
            }
        }

        log::debug!(
            "Broadcast {} bytes to {}/{} connections",
            frame.len(),
            report.delivered(),
            recipients.len()
        );
        Ok(report)
    }
}
