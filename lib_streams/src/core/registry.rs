//! # Connection Registry
//!
//! Best-effort membership of live subscriber connections, kept in the durable
//! state store as one mergeable set. Registration and removal are idempotent.
//! A listed id is only believed to be live; delivery failures reveal the
//! stale ones and the broadcaster removes them.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::connections::state_store::{StateStore, StoreError};

/// Store partition holding the connection set.
pub const CONNECTIONS_PARTITION: &str = "connections";
/// Key of the single member set inside [`CONNECTIONS_PARTITION`].
pub const CONNECTIONS_KEY: &str = "a";

/// Accessor over the connection record of one stream.
#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn StateStore>,
}

impl ConnectionRegistry {
    /// Wraps the store of the stream the connections subscribe to.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Adds `id` to the connection set.
    pub async fn register(&self, id: &str) -> Result<(), StoreError> {
        self.store
            .add_members(CONNECTIONS_PARTITION, CONNECTIONS_KEY, &[id.to_string()])
            .await?;
        log::info!("Connection '{}' registered", id);
        Ok(())
    }

    /// Removes `id` from the connection set.
    pub async fn unregister(&self, id: &str) -> Result<(), StoreError> {
        self.store
            .remove_members(CONNECTIONS_PARTITION, CONNECTIONS_KEY, &[id.to_string()])
            .await?;
        log::info!("Connection '{}' unregistered", id);
        Ok(())
    }

    /// Every id currently believed to be connected.
    pub async fn list_all(&self) -> Result<BTreeSet<String>, StoreError> {
        self.store.members(CONNECTIONS_PARTITION).await
    }
}
