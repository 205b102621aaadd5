//! # Continuation Hand-off
//!
//! A finishing generation passes its cache and lease ownership to exactly one
//! successor by emitting a [`Checkpoint`]. The checkpoint travels as an
//! opaque JSON payload so any queue able to carry bytes can deliver it.
//! Delivery is attempted once; the watchdog covers a lost checkpoint.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::snapshot::Snapshot;

/// Errors raised while handing off to the next generation.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// Nobody is listening for continuations any more.
    #[error("Continuation channel is closed")]
    Closed,

    /// The checkpoint could not be encoded or decoded.
    #[error("Checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// State handed from one generation to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint<L> {
    /// Stream the checkpoint belongs to.
    pub stream: String,
    /// Sequence number of the generation that emitted it.
    pub generation: u64,
    /// Lease owner token the successor continues with.
    pub lease_owner: String,
    /// Generation cache at hand-off, `None` when no cycle succeeded.
    pub cache: Option<Snapshot<L>>,
}

impl<L: Serialize> Checkpoint<L> {
    /// Encodes the checkpoint as an opaque payload.
    pub fn encode(&self) -> Result<Bytes, HandoffError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

impl<L: DeserializeOwned> Checkpoint<L> {
    /// Decodes a payload produced by [`Checkpoint::encode`].
    pub fn decode(payload: &[u8]) -> Result<Self, HandoffError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// What started a generation.
#[derive(Debug, Clone)]
pub enum Trigger<L> {
    /// The fixed-interval watchdog, or the first start of the process.
    Watchdog,
    /// A predecessor's hand-off.
    Continuation(Checkpoint<L>),
}

/// Destination of hand-off payloads.
#[async_trait]
pub trait ContinuationSink: Send + Sync {
    /// Emits one encoded checkpoint.
    async fn emit(&self, payload: Bytes) -> Result<(), HandoffError>;
}

/// In-process continuation queue read by the supervisor.
#[derive(Debug, Clone)]
pub struct ChannelContinuation {
    sender: mpsc::UnboundedSender<Bytes>,
}

impl ChannelContinuation {
    /// Creates the sink together with the receiver the supervisor drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ContinuationSink for ChannelContinuation {
    async fn emit(&self, payload: Bytes) -> Result<(), HandoffError> {
        self.sender.send(payload).map_err(|_| HandoffError::Closed)
    }
}
