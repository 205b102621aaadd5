//! # Redis State Store
//!
//! `StateStore` backed by Redis through a multiplexed `ConnectionManager`
//! (reconnects transparently, cheap to clone per command).
//!
//! Key layout, all under a per-stream `namespace`:
//!
//! - `{ns}:{partition}`: hash of `key -> JSON value`
//! - `{ns}:{partition}:set:{key}`: set of members; `{ns}:{partition}:sets`
//!   indexes the set keys of a partition so they can be unioned
//! - `{ns}:{partition}:{key}`: lease string holding the owner token, with a
//!   millisecond TTL

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use serde_json::Value;

use crate::connections::state_store::{StateStore, StoreError};

const ACQUIRE_LEASE: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false or current == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
  return 1
end
return 0
"#;

const TRANSFER_LEASE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
  return 1
end
return 0
"#;

const RELEASE_LEASE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// A handler for Redis-backed durable state.
#[derive(Clone)]
pub struct RedisStore {
    /// Multiplexed connection shared by every command.
    manager: ConnectionManager,
    /// Prefix separating the streams sharing one Redis instance.
    namespace: String,
}

impl RedisStore {
    /// Connects to Redis and returns a store scoped to `namespace`.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://127.0.0.1/").
    /// * `namespace` - Key prefix for this stream (e.g., "market").
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        log::info!("Redis state store connected (namespace '{}')", namespace);
        Ok(Self::with_manager(manager, namespace))
    }

    /// Wraps an existing connection manager, so several namespaces can share it.
    pub fn with_manager(manager: ConnectionManager, namespace: &str) -> Self {
        Self {
            manager,
            namespace: namespace.to_string(),
        }
    }

    fn hash_key(&self, partition: &str) -> String {
        format!("{}:{}", self.namespace, partition)
    }

    fn set_key(&self, partition: &str, key: &str) -> String {
        format!("{}:{}:set:{}", self.namespace, partition, key)
    }

    fn set_index_key(&self, partition: &str) -> String {
        format!("{}:{}:sets", self.namespace, partition)
    }

    fn lease_key(&self, partition: &str, key: &str) -> String {
        format!("{}:{}:{}", self.namespace, partition, key)
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn put(&self, partition: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&value)?;
        let mut conn = self.manager.clone();
        let _: () = conn.hset(self.hash_key(partition), key, encoded).await?;
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.hdel(self.hash_key(partition), key).await?;
        let _: () = conn.del(self.set_key(partition, key)).await?;
        let _: () = conn.srem(self.set_index_key(partition), key).await?;
        Ok(())
    }

    async fn query_by_partition(&self, partition: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let mut conn = self.manager.clone();
        let raw: HashMap<String, String> = conn.hgetall(self.hash_key(partition)).await?;

        let mut rows = raw
            .into_iter()
            .map(|(key, encoded)| Ok((key, serde_json::from_str(&encoded)?)))
            .collect::<Result<Vec<(String, Value)>, StoreError>>()?;
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    async fn add_members(&self, partition: &str, key: &str, members: &[String]) -> Result<(), StoreError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let _: () = conn.sadd(self.set_index_key(partition), key).await?;
        let _: () = conn.sadd(self.set_key(partition, key), members.to_vec()).await?;
        Ok(())
    }

    async fn remove_members(&self, partition: &str, key: &str, members: &[String]) -> Result<(), StoreError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let _: () = conn.srem(self.set_key(partition, key), members.to_vec()).await?;
        Ok(())
    }

    async fn members(&self, partition: &str) -> Result<BTreeSet<String>, StoreError> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = conn.smembers(self.set_index_key(partition)).await?;

        let mut all = BTreeSet::new();
        for key in keys {
            let ids: Vec<String> = conn.smembers(self.set_key(partition, &key)).await?;
            all.extend(ids);
        }
        Ok(all)
    }

    async fn try_acquire_lease(
        &self,
        partition: &str,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let acquired: i64 = Script::new(ACQUIRE_LEASE)
            .key(self.lease_key(partition, key))
            .arg(owner)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(acquired == 1)
    }

    async fn transfer_lease(
        &self,
        partition: &str,
        key: &str,
        from: &str,
        to: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let moved: i64 = Script::new(TRANSFER_LEASE)
            .key(self.lease_key(partition, key))
            .arg(from)
            .arg(to)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved == 1)
    }

    async fn release_lease(&self, partition: &str, key: &str, owner: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: i64 = Script::new(RELEASE_LEASE)
            .key(self.lease_key(partition, key))
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Need a Redis server: `REDIS_URL` or `redis://127.0.0.1/`.
    //! Run with `cargo test -- --ignored`.
    use super::*;
    use serde_json::json;

    async fn store() -> RedisStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let namespace = format!("streams-test:{}", uuid::Uuid::new_v4());
        RedisStore::connect(&url, &namespace).await.unwrap()
    }

    #[tokio::test]
    #[ignore] // requires a running Redis
    async fn values_live_in_one_hash_per_partition() {
        let store = store().await;
        store.put("cache", "X1-B", json!({"v": 2})).await.unwrap();
        store.put("cache", "X1-A", json!({"v": 1})).await.unwrap();
        store.put("other", "X1-A", json!({"v": 9})).await.unwrap();

        let rows = store.query_by_partition("cache").await.unwrap();
        assert_eq!(
            rows,
            vec![
                ("X1-A".to_string(), json!({"v": 1})),
                ("X1-B".to_string(), json!({"v": 2})),
            ]
        );

        let mut conn = store.manager.clone();
        let raw: Option<String> = conn.hget(store.hash_key("cache"), "X1-A").await.unwrap();
        assert_eq!(raw.as_deref(), Some(r#"{"v":1}"#));

        store.delete("cache", "X1-A").await.unwrap();
        assert_eq!(store.query_by_partition("cache").await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore] // requires a running Redis
    async fn member_sets_are_indexed_and_unioned() {
        let store = store().await;
        store.add_members("connections", "a", &["c1".into(), "c2".into()]).await.unwrap();
        store.add_members("connections", "b", &["c3".into()]).await.unwrap();
        store.remove_members("connections", "a", &["c1".into(), "nope".into()]).await.unwrap();

        let mut conn = store.manager.clone();
        let mut indexed: Vec<String> = conn.smembers(store.set_index_key("connections")).await.unwrap();
        indexed.sort();
        assert_eq!(indexed, vec!["a", "b"]);

        let members = store.members("connections").await.unwrap();
        assert_eq!(members.into_iter().collect::<Vec<_>>(), vec!["c2", "c3"]);

        store.delete("connections", "b").await.unwrap();
        let indexed: Vec<String> = conn.smembers(store.set_index_key("connections")).await.unwrap();
        assert_eq!(indexed, vec!["a"]);
        assert!(store.members("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore] // requires a running Redis
    async fn lease_scripts_acquire_refresh_release_and_expire() {
        let store = store().await;
        let ttl = Duration::from_secs(10);

        assert!(store.try_acquire_lease("lease", "fp", "gen-1", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("lease", "fp", "gen-2", ttl).await.unwrap());
        assert!(store.try_acquire_lease("lease", "fp", "gen-1", ttl).await.unwrap());

        store.release_lease("lease", "fp", "gen-2").await.unwrap();
        assert!(!store.try_acquire_lease("lease", "fp", "gen-2", ttl).await.unwrap());
        store.release_lease("lease", "fp", "gen-1").await.unwrap();
        assert!(store.try_acquire_lease("lease", "fp", "gen-2", Duration::from_millis(100)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(store.try_acquire_lease("lease", "fp", "gen-3", ttl).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // requires a running Redis
    async fn lease_transfer_is_a_compare_and_swap() {
        let store = store().await;
        let ttl = Duration::from_secs(10);

        assert!(!store.transfer_lease("lease", "fp", "gen-1", "gen-2", ttl).await.unwrap());
        assert!(store.try_acquire_lease("lease", "fp", "gen-1", ttl).await.unwrap());

        assert!(store.transfer_lease("lease", "fp", "gen-1", "gen-2a", ttl).await.unwrap());
        assert!(!store.transfer_lease("lease", "fp", "gen-1", "gen-2b", ttl).await.unwrap());

        let mut conn = store.manager.clone();
        let holder: Option<String> = conn.get(store.lease_key("lease", "fp")).await.unwrap();
        assert_eq!(holder.as_deref(), Some("gen-2a"));
        let pttl: i64 = redis::cmd("PTTL")
            .arg(store.lease_key("lease", "fp"))
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(pttl > 0);
    }
}
