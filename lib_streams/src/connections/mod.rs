//! # Connections Module
//!
//! This module handles the durable state shared across generations: the
//! cross-generation entity cache, the subscriber connection registry and the
//! generation lease. Callers only see the `StateStore` trait; the backing
//! store is chosen at startup.

/// The `StateStore` trait, its error type and the in-memory implementation.
pub mod state_store;

/// Redis-backed `StateStore`.
#[cfg(feature = "connections")]
pub mod cache_redis;

pub use state_store::{MemoryStore, StateStore, StoreError};

#[cfg(feature = "connections")]
pub use cache_redis::RedisStore;
