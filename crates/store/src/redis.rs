use crate::{Store, StoreError};
use async_trait::async_trait;
use tracing::debug;

/// Operations this backend needs from a RESP client. The real client library
/// is an external collaborator; anything speaking `HINCRBY`/`PING` fits.
#[async_trait]
pub trait RedisCommands: Send + Sync {
    /// Atomically adds `delta` to `field` of the hash at `key` and returns
    /// the new value.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Key-value backend: the server-side atomic increment makes a reservation a
/// single round trip, with no compare-and-swap loop.
pub struct RedisStore<C> {
    client: C,
}

impl<C> RedisStore<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

fn hash_key(data_center: u8, db: &str, table: &str) -> String {
    format!("rabbitid_{data_center}_{db}_{table}")
}

#[async_trait]
impl<C: RedisCommands> Store for RedisStore<C> {
    async fn range(
        &self,
        data_center: u8,
        db: &str,
        table: &str,
        size: i64,
    ) -> Result<i64, StoreError> {
        let key = hash_key(data_center, db, table);
        let high = self.client.hincrby(&key, table, size).await?;
        debug!(key, size, last = high - size, "reserved range");
        Ok(high - size)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Hash-map stand-in for the RESP client.
    #[derive(Default)]
    struct FakeRedis {
        hashes: Mutex<HashMap<(String, String), i64>>,
    }

    #[async_trait]
    impl RedisCommands for FakeRedis {
        async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
            let mut hashes = self.hashes.lock().unwrap();
            let value = hashes.entry((key.to_string(), field.to_string())).or_insert(0);
            *value += delta;
            Ok(*value)
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_range_starts_at_zero_and_advances() {
        let store = RedisStore::new(FakeRedis::default());
        assert_eq!(store.range(0, "test", "test_1", 100).await.unwrap(), 0);
        assert_eq!(store.range(0, "test", "test_1", 100).await.unwrap(), 100);
        assert_eq!(store.range(0, "test", "test_1", 50).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_range_keys_are_scoped() {
        let store = RedisStore::new(FakeRedis::default());
        store.range(0, "test", "test_1", 100).await.unwrap();
        // Different data center, db or table: independent counters.
        assert_eq!(store.range(1, "test", "test_1", 100).await.unwrap(), 0);
        assert_eq!(store.range(0, "other", "test_1", 100).await.unwrap(), 0);
        assert_eq!(store.range(0, "test", "test_2", 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ping() {
        let store = RedisStore::new(FakeRedis::default());
        assert!(store.ping().await.is_ok());
        assert!(!store.block_db(0, "test"));
    }
}
