//! # Stream Domain
//!
//! The seam between the generic poll-diff-broadcast engine and one kind of
//! tracked entity. A domain knows how to fetch one partition's listing, how
//! to name its entities, and which diff shape applies to it.

use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::snapshot::Snapshot;
use crate::retrieve::upstream_http::{UpstreamClient, UpstreamError};

/// Result of diffing two snapshots of a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet<D> {
    /// Batch to broadcast for this cycle; `None` means nothing is sent.
    pub delta: Option<D>,
    /// Partitions whose listings produced events and must be re-persisted.
    pub changed_partitions: BTreeSet<String>,
}

impl<D> Default for ChangeSet<D> {
    fn default() -> Self {
        Self {
            delta: None,
            changed_partitions: BTreeSet::new(),
        }
    }
}

impl<D> ChangeSet<D> {
    /// Whether the cycle produced nothing to broadcast.
    pub fn is_empty(&self) -> bool {
        self.delta.is_none()
    }
}

/// One kind of tracked entity (flight plans, marketplace listings).
#[async_trait]
pub trait StreamDomain: Send + Sync + 'static {
    /// Everything observed for one resource partition.
    type Listing: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// The batch broadcast to subscribers for one cycle.
    type Delta: Serialize + Send + Sync + 'static;

    /// Stream name, used for logging, store namespaces and the lease key.
    fn name(&self) -> &str;

    /// Fetches the listing of one partition.
    ///
    /// Returns the partition symbol as reported upstream together with the
    /// listing.
    async fn fetch_partition(
        &self,
        client: &UpstreamClient,
        partition: &str,
    ) -> Result<(String, Self::Listing), UpstreamError>;

    /// Identities of the entities in a listing.
    fn entity_ids(&self, listing: &Self::Listing) -> Vec<String>;

    /// Pure delta between the previous and current snapshot.
    fn diff(
        &self,
        previous: &Snapshot<Self::Listing>,
        current: &Snapshot<Self::Listing>,
    ) -> ChangeSet<Self::Delta>;

    /// Lists the partitions to poll when none are configured.
    ///
    /// Domains without a discovery endpoint return `Ok(None)`.
    async fn discover_partitions(
        &self,
        _client: &UpstreamClient,
    ) -> Result<Option<Vec<String>>, UpstreamError> {
        Ok(None)
    }
}
