//! # Snapshot Fetcher
//!
//! Retrieves the full current state of every tracked partition, one upstream
//! call per partition, all issued concurrently. Results are aggregated in
//! partition key order. Any failed partition fails the whole fetch; a cycle
//! never works from a partial snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::try_join_all;
use thiserror::Error;

use crate::core::domain::StreamDomain;
use crate::core::snapshot::Snapshot;
use crate::retrieve::upstream_http::{UpstreamClient, UpstreamError};

/// Reasons a snapshot could not be assembled.
#[derive(Debug, Error)]
pub enum FetchError {
    /// One partition failed after the client exhausted its retries.
    #[error("Fetching partition '{partition}' failed: {source}")]
    Partition {
        /// Partition whose fetch failed.
        partition: String,
        /// Underlying upstream failure.
        #[source]
        source: UpstreamError,
    },

    /// Two requested partitions resolved to the same upstream symbol.
    #[error("Partition '{0}' was returned more than once")]
    DuplicatePartition(String),

    /// The same entity identity was listed under two partitions.
    #[error("Entity '{identity}' listed under both '{first}' and '{second}'")]
    DuplicateIdentity {
        /// The repeated identity.
        identity: String,
        /// Partition that listed it first in aggregation order.
        first: String,
        /// Partition that listed it again.
        second: String,
    },
}

/// Concurrent fetcher for one stream domain.
pub struct SnapshotFetcher<D: StreamDomain> {
    domain: Arc<D>,
    client: Arc<UpstreamClient>,
}

impl<D: StreamDomain> SnapshotFetcher<D> {
    /// Creates a fetcher sharing the domain and client of its generation.
    pub fn new(domain: Arc<D>, client: Arc<UpstreamClient>) -> Self {
        Self { domain, client }
    }

    /// Fetches every partition in `partitions` and aggregates the listings.
    pub async fn fetch_snapshot(
        &self,
        partitions: &[String],
    ) -> Result<Snapshot<D::Listing>, FetchError> {
        let requests = partitions.iter().map(|partition| async move {
            self.domain
                .fetch_partition(&self.client, partition)
                .await
                .map_err(|source| FetchError::Partition {
                    partition: partition.clone(),
                    source,
                })
        });
        let mut listings = try_join_all(requests).await?;
        listings.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut owners: HashMap<String, String> = HashMap::new();
        let mut snapshot = Snapshot::new();
        for (partition, listing) in listings {
            if snapshot.contains(&partition) {
                return Err(FetchError::DuplicatePartition(partition));
            }
            for identity in self.domain.entity_ids(&listing) {
                match owners.get(&identity) {
                    Some(first) if *first != partition => {
                        return Err(FetchError::DuplicateIdentity {
                            identity,
                            first: first.clone(),
                            second: partition,
                        });
                    }
                    Some(_) => {}
                    None => {
                        owners.insert(identity, partition.clone());
                    }
                }
            }
            snapshot.insert(partition, listing);
        }

        log::debug!(
            "[{}] Fetched {} partitions",
            self.domain.name(),
            snapshot.len()
        );
        Ok(snapshot)
    }
}
