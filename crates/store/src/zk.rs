use crate::{Store, StoreError, RETRY_TIMES};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const ZK_ROOT: &str = "/rabbitid";

/// Errors surfaced by the coordination-store client contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZkError {
    /// The node (or a parent on a create) does not exist.
    #[error("node does not exist")]
    NoNode,
    /// The version guard on a write did not match.
    #[error("version mismatch")]
    BadVersion,
    /// A create raced with another creator.
    #[error("node already exists")]
    NodeExists,
    /// Connection or session failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Operations this backend needs from a hierarchical coordination client.
/// The real client is an external collaborator; creates use its default open
/// ACL.
#[async_trait]
pub trait ZkClient: Send + Sync {
    /// Reads a node's payload and version.
    async fn get(&self, path: &str) -> Result<(String, i32), ZkError>;

    /// Writes `data` when the node's version still equals `version`.
    async fn set(&self, path: &str, data: &str, version: i32) -> Result<(), ZkError>;

    /// Creates a persistent node with `data`.
    async fn create(&self, path: &str, data: &str) -> Result<(), ZkError>;
}

/// Tunables for the hierarchical backend.
#[derive(Debug, Clone)]
pub struct ZkConfig {
    /// Probation window for a db whose namespace is missing: refills for it
    /// are skipped until this much time has passed.
    pub fail_sleep: Duration,
}

impl Default for ZkConfig {
    fn default() -> Self {
        Self {
            fail_sleep: Duration::from_secs(1),
        }
    }
}

/// Hierarchical coordination-store backend: version-guarded read-modify-write
/// on `/rabbitid/<dc>/<db>/<table>`, with a probation table for dbs whose
/// parent node has not been provisioned.
pub struct ZkStore<C> {
    client: C,
    config: ZkConfig,
    /// db namespaces on probation, stamped when their parent was last found
    /// missing.
    blocked: Mutex<HashMap<String, Instant>>,
}

impl<C> ZkStore<C> {
    pub fn new(client: C) -> Self {
        Self::with_config(client, ZkConfig::default())
    }

    pub fn with_config(client: C, config: ZkConfig) -> Self {
        Self {
            client,
            config,
            blocked: Mutex::new(HashMap::new()),
        }
    }

    fn block_key(data_center: u8, db: &str) -> String {
        format!("{data_center}/{db}")
    }

    /// Checks probation for `(data_center, db)`, evicting expired entries so
    /// the next refill may probe the namespace again.
    fn is_blocked(&self, data_center: u8, db: &str) -> bool {
        let key = Self::block_key(data_center, db);
        let mut blocked = self.blocked.lock().unwrap();
        match blocked.get(&key) {
            Some(since) if since.elapsed() < self.config.fail_sleep => true,
            Some(_) => {
                blocked.remove(&key);
                false
            }
            None => false,
        }
    }

    fn block(&self, data_center: u8, db: &str) {
        self.blocked
            .lock()
            .unwrap()
            .insert(Self::block_key(data_center, db), Instant::now());
    }

    fn unblock(&self, data_center: u8, db: &str) {
        self.blocked
            .lock()
            .unwrap()
            .remove(&Self::block_key(data_center, db));
    }
}

fn node_path(data_center: u8, db: &str, table: &str) -> String {
    format!("{ZK_ROOT}/{data_center}/{db}/{table}")
}

fn db_path(data_center: u8, db: &str) -> String {
    format!("{ZK_ROOT}/{data_center}/{db}")
}

impl<C: ZkClient> ZkStore<C> {
    /// Returns `true` when the `<db>` parent node exists.
    async fn db_exists(&self, data_center: u8, db: &str) -> bool {
        self.client.get(&db_path(data_center, db)).await.is_ok()
    }
}

#[async_trait]
impl<C: ZkClient> Store for ZkStore<C> {
    async fn range(
        &self,
        data_center: u8,
        db: &str,
        table: &str,
        size: i64,
    ) -> Result<i64, StoreError> {
        if self.is_blocked(data_center, db) {
            return Err(StoreError::DbNotExists);
        }
        let path = node_path(data_center, db, table);

        for attempt in 1..=RETRY_TIMES {
            let write_err = match self.client.get(&path).await {
                Ok((payload, version)) => {
                    let min = payload
                        .parse::<i64>()
                        .map_err(|_| StoreError::BadPayload(format!("{path} = {payload:?}")))?;
                    match self.client.set(&path, &(min + size).to_string(), version).await {
                        Ok(()) => {
                            debug!(path, size, last = min, attempt, "reserved range");
                            self.unblock(data_center, db);
                            return Ok(min);
                        }
                        Err(e) => e,
                    }
                }
                Err(ZkError::NoNode) => {
                    // First reservation for this table: the range (0, size].
                    match self.client.create(&path, &size.to_string()).await {
                        Ok(()) => {
                            debug!(path, size, attempt, "created high-water node");
                            self.unblock(data_center, db);
                            return Ok(0);
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => {
                    warn!(path, attempt, error = %e, "read failed, retrying");
                    continue;
                }
            };

            match write_err {
                // Lost the race to another replica; re-read and try again.
                ZkError::BadVersion | ZkError::NodeExists => {
                    warn!(path, attempt, error = %write_err, "write conflict, retrying");
                }
                ZkError::NoNode => {
                    if !self.db_exists(data_center, db).await {
                        self.block(data_center, db);
                    }
                    return Err(StoreError::DbNotExists);
                }
                ZkError::Transport(msg) => return Err(StoreError::Transport(msg)),
            }
        }
        Err(StoreError::RetriesExhausted {
            attempts: RETRY_TIMES,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .get(ZK_ROOT)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Transport(e.to_string()))
    }

    async fn init(&self, data_center: u8) -> Result<(), StoreError> {
        // The data-center node is provisioned out of band; refuse to start
        // without it.
        match self.client.get(&format!("{ZK_ROOT}/{data_center}")).await {
            Ok(_) => Ok(()),
            Err(ZkError::NoNode) => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::Transport(e.to_string())),
        }
    }

    fn block_db(&self, data_center: u8, db: &str) -> bool {
        self.is_blocked(data_center, db)
    }
}
