use crate::{Store, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Self-contained coordinator: a mutex-guarded map with fetch-and-add
/// semantics. Backs the tests and the demo binary; replicas sharing one
/// instance get disjoint ranges just like against a real backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    high: Mutex<HashMap<(u8, String, String), i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current high-water for a key, 0 when nothing was reserved yet.
    pub fn high(&self, data_center: u8, db: &str, table: &str) -> i64 {
        self.high
            .lock()
            .unwrap()
            .get(&(data_center, db.to_string(), table.to_string()))
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn range(
        &self,
        data_center: u8,
        db: &str,
        table: &str,
        size: i64,
    ) -> Result<i64, StoreError> {
        let mut high = self.high.lock().unwrap();
        let value = high
            .entry((data_center, db.to_string(), table.to_string()))
            .or_insert(0);
        let last = *value;
        *value += size;
        Ok(last)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_range_is_fetch_and_add() {
        let store = MemoryStore::new();
        assert_eq!(store.range(0, "test", "t", 10).await.unwrap(), 0);
        assert_eq!(store.range(0, "test", "t", 10).await.unwrap(), 10);
        assert_eq!(store.high(0, "test", "t"), 20);
    }

    #[tokio::test]
    async fn test_concurrent_ranges_are_disjoint() {
        let store = Arc::new(MemoryStore::new());
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.range(0, "test", "t", 100).await.unwrap()
            }));
        }

        let mut mins = Vec::new();
        for task in tasks {
            mins.push(task.await.unwrap());
        }
        mins.sort_unstable();
        mins.dedup();
        assert_eq!(mins.len(), 64);
        assert_eq!(store.high(0, "test", "t"), 6_400);
    }
}
