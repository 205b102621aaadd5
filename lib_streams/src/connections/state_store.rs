//! # Durable State Store
//!
//! A generic key-value store keyed by `(partition, key)`. The engine uses it
//! for three things, told apart only by partition name:
//!
//! - `"cache"`: the durable copy of observed entity state, one JSON value per
//!   resource partition.
//! - `"connections"`: a mergeable set of registered connection ids stored
//!   under a single key.
//! - `"lease"`: the generation lease that keeps one live generation per stream.
//!
//! Implementations must tolerate concurrent readers (broadcast fan-out) and a
//! writer (the live generation) without external locking.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Errors raised by a state store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command.
    #[error("State store backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded.
    #[error("State store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable `(partition, key) -> value` storage.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Creates or overwrites the value under `(partition, key)`.
    async fn put(&self, partition: &str, key: &str, value: Value) -> Result<(), StoreError>;

    /// Removes `(partition, key)`. Removing a missing key is not an error.
    async fn delete(&self, partition: &str, key: &str) -> Result<(), StoreError>;

    /// Lists every `(key, value)` stored under `partition`, ordered by key.
    async fn query_by_partition(&self, partition: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Adds `members` to the set stored under `(partition, key)`.
    async fn add_members(&self, partition: &str, key: &str, members: &[String]) -> Result<(), StoreError>;

    /// Removes `members` from the set stored under `(partition, key)`.
    async fn remove_members(&self, partition: &str, key: &str, members: &[String]) -> Result<(), StoreError>;

    /// Union of every member set stored under `partition`.
    async fn members(&self, partition: &str) -> Result<BTreeSet<String>, StoreError>;

    /// Takes the lease `(partition, key)` for `owner` for `ttl`.
    ///
    /// Succeeds when the lease is free, expired, or already held by `owner`
    /// (in which case the TTL is refreshed). Returns `false` when another
    /// owner holds an unexpired lease.
    async fn try_acquire_lease(
        &self,
        partition: &str,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Moves an unexpired lease from `from` to `to` for `ttl`.
    ///
    /// Compare-and-swap: returns `false` without touching the lease when it is
    /// free, expired, or held by anyone but `from`. Of two callers presenting
    /// the same `from`, at most one succeeds.
    async fn transfer_lease(
        &self,
        partition: &str,
        key: &str,
        from: &str,
        to: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Releases the lease if, and only if, it is held by `owner`.
    async fn release_lease(&self, partition: &str, key: &str, owner: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, HashMap<String, Value>>,
    sets: HashMap<String, HashMap<String, BTreeSet<String>>>,
    leases: HashMap<(String, String), (String, Instant)>,
}

/// In-process `StateStore`, used when no Redis URL is configured and in tests.
///
/// Cloning shares the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put(&self, partition: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .values
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(rows) = state.values.get_mut(partition) {
            rows.remove(key);
        }
        if let Some(sets) = state.sets.get_mut(partition) {
            sets.remove(key);
        }
        Ok(())
    }

    async fn query_by_partition(&self, partition: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let state = self.state.read().await;
        let mut rows: Vec<(String, Value)> = state
            .values
            .get(partition)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    async fn add_members(&self, partition: &str, key: &str, members: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .sets
            .entry(partition.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn remove_members(&self, partition: &str, key: &str, members: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(set) = state.sets.get_mut(partition).and_then(|sets| sets.get_mut(key)) {
            for member in members {
                set.remove(member);
            }
        }
        Ok(())
    }

    async fn members(&self, partition: &str) -> Result<BTreeSet<String>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .sets
            .get(partition)
            .map(|sets| sets.values().flatten().cloned().collect())
            .unwrap_or_default())
    }

    async fn try_acquire_lease(
        &self,
        partition: &str,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let now = Instant::now();
        let lease_key = (partition.to_string(), key.to_string());

        if let Some((holder, expires_at)) = state.leases.get(&lease_key) {
            if holder != owner && *expires_at > now {
                return Ok(false);
            }
        }
        state.leases.insert(lease_key, (owner.to_string(), now + ttl));
        Ok(true)
    }

    async fn transfer_lease(
        &self,
        partition: &str,
        key: &str,
        from: &str,
        to: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let now = Instant::now();
        let lease_key = (partition.to_string(), key.to_string());

        match state.leases.get_mut(&lease_key) {
            Some((holder, expires_at)) if holder.as_str() == from && *expires_at > now => {
                *holder = to.to_string();
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, partition: &str, key: &str, owner: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let lease_key = (partition.to_string(), key.to_string());
        if state
            .leases
            .get(&lease_key)
            .is_some_and(|(holder, _)| holder == owner)
        {
            state.leases.remove(&lease_key);
        }
        Ok(())
    }
}
