use crate::{Store, StoreError, RETRY_TIMES};
use async_trait::async_trait;
use tracing::{debug, warn};

const ETCD_ROOT: &str = "/rabbitid";

/// Predicate of a compare-and-swap transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnCompare {
    /// The key must not exist yet (create-revision zero).
    Absent,
    /// The key's current value must equal this payload.
    ValueEq(String),
}

/// Outcome of a compare-and-swap transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOutcome {
    /// The predicate held and the new value was written.
    Committed,
    /// The predicate failed; carries the key's current value, or `None` when
    /// the key could not be located in the same transaction.
    Conflict(Option<String>),
}

/// Operations this backend needs from a transactional KV client. Maps onto a
/// single `Txn(If(cmp).Then(Put).Else(Get))` round trip in the real client.
#[async_trait]
pub trait EtcdKv: Send + Sync {
    /// Reads the key's current value, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically writes `value` when `cmp` holds, otherwise reports the
    /// current value.
    async fn put_if(
        &self,
        key: &str,
        cmp: TxnCompare,
        value: &str,
    ) -> Result<TxnOutcome, StoreError>;
}

/// Transactional consistent-store backend. Reservations are optimistic: read
/// the current high-water, then commit "advance by `size` if unchanged",
/// feeding any conflicting value into the next attempt.
pub struct EtcdStore<C> {
    kv: C,
}

impl<C> EtcdStore<C> {
    pub fn new(kv: C) -> Self {
        Self { kv }
    }
}

fn node_key(data_center: u8, db: &str, table: &str) -> String {
    format!("{ETCD_ROOT}/{data_center}/{db}/{table}")
}

fn parse_high(key: &str, payload: &str) -> Result<i64, StoreError> {
    payload
        .parse::<i64>()
        .map_err(|_| StoreError::BadPayload(format!("{key} = {payload:?}")))
}

#[async_trait]
impl<C: EtcdKv> Store for EtcdStore<C> {
    async fn range(
        &self,
        data_center: u8,
        db: &str,
        table: &str,
        size: i64,
    ) -> Result<i64, StoreError> {
        let key = node_key(data_center, db, table);
        let mut last = match self.kv.get(&key).await? {
            Some(payload) => parse_high(&key, &payload)?,
            None => 0,
        };

        for attempt in 1..=RETRY_TIMES {
            let next = (last + size).to_string();
            let cmp = if last == 0 {
                TxnCompare::Absent
            } else {
                TxnCompare::ValueEq(last.to_string())
            };
            match self.kv.put_if(&key, cmp, &next).await? {
                TxnOutcome::Committed => {
                    debug!(key, size, last, attempt, "reserved range");
                    return Ok(last);
                }
                TxnOutcome::Conflict(Some(current)) => {
                    // Another replica advanced the mark; adopt its value and
                    // try again. Nothing was reserved on this attempt.
                    warn!(key, last, current, attempt, "txn conflict, retrying");
                    last = parse_high(&key, &current)?;
                }
                TxnOutcome::Conflict(None) => {
                    warn!(key, last, attempt, "txn conflict without current value");
                    return Err(StoreError::NotFound);
                }
            }
        }
        Err(StoreError::RetriesExhausted {
            attempts: RETRY_TIMES,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.kv.get(ETCD_ROOT).await.map(|_| ())
    }
}
