//! Coordinator backends for the segmented ID allocator.
//!
//! A [`Store`] persists, per `(data_center, db, table)`, the largest integer
//! `high` such that IDs `(0, high]` have been reserved somewhere in the
//! fleet. Reserving a new range atomically advances `high` by `size` and
//! returns the previous value, so competing replicas always walk away with
//! disjoint ranges.
//!
//! Three backends cover the coordination substrates the service runs
//! against, from the weakest primitive to the strongest:
//!
//! - [`RedisStore`] — a key-value cache whose server-side atomic increment
//!   makes the reservation a single round trip.
//! - [`EtcdStore`] — a transactional consistent store; reservations are
//!   optimistic compare-and-swap transactions with bounded retries.
//! - [`ZkStore`] — a hierarchical coordination store with version-guarded
//!   writes and a probation table for unprovisioned db namespaces.
//!
//! The concrete client libraries are external collaborators: each backend is
//! generic over a contract trait ([`RedisCommands`], [`EtcdKv`], [`ZkClient`])
//! naming exactly the operations it consumes. [`MemoryStore`] is a
//! self-contained coordinator for tests and demos.

mod error;
mod etcd;
mod memory;
mod redis;
mod zk;

pub use error::StoreError;
pub use etcd::{EtcdKv, EtcdStore, TxnCompare, TxnOutcome};
pub use memory::MemoryStore;
pub use redis::{RedisCommands, RedisStore};
pub use zk::{ZkClient, ZkConfig, ZkError, ZkStore};

use async_trait::async_trait;

/// Compare-and-swap style backends give up after this many conflicts.
pub const RETRY_TIMES: u32 = 10;

/// Persists the reservation high-water mark and hands out disjoint ranges.
#[async_trait]
pub trait Store: Send + Sync {
    /// Advances the high-water for `(data_center, db, table)` by `size` and
    /// returns the previous value: the new segment's `min`, exclusive lower
    /// bound of the reserved range `(min, min + size]`.
    ///
    /// The returned value is unique across all concurrent callers on all
    /// replicas. On failure no side effect is visible to other callers.
    async fn range(
        &self,
        data_center: u8,
        db: &str,
        table: &str,
        size: i64,
    ) -> Result<i64, StoreError>;

    /// Connectivity check, run before each background refill sweep.
    async fn ping(&self) -> Result<(), StoreError>;

    /// One-time setup for a data center. A no-op for most backends.
    async fn init(&self, _data_center: u8) -> Result<(), StoreError> {
        Ok(())
    }

    /// Advisory health flag: `true` while refills for this db should be
    /// skipped (its backend namespace is missing or on probation).
    fn block_db(&self, _data_center: u8, _db: &str) -> bool {
        false
    }
}
