use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rabbitid_segment::{Segment, SegmentError, DATA_CENTER_MASK};
use rabbitid_store::{Store, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Attempts per `next` call before giving up on a starved segment.
const NEXT_RETRIES: u32 = 5;

/// Cadence of the background refill sweep.
const REFILL_INTERVAL: Duration = Duration::from_millis(50);

/// Deadline applied to every coordinator call.
const STORE_DEADLINE: Duration = Duration::from_millis(200);

/// Largest multiple of the configured step a refill may request.
const MAX_STEP_FACTOR: i64 = 1024;

/// Errors surfaced by the service layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// `last`/`remainder`/`max` on a key that never issued an ID.
    #[error("unknown key")]
    UnknownKey,

    /// The data-center tag must fit the 4-bit stripe of the ID layout.
    #[error("data center {0} does not fit in 4 bits")]
    DataCenterOutOfRange(u8),
}

/// Tunables for [`Service`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Data-center tag baked into every issued ID. Must fit in 4 bits.
    pub data_center: u8,
    /// Initial (and minimum) reservation batch size.
    pub step: i64,
    /// A segment refilled again sooner than this is starving: double the
    /// batch.
    pub min_buffer_time: Duration,
    /// A segment idle longer than this is saturated: halve the batch.
    pub max_buffer_time: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_center: 0,
            step: 1000,
            min_buffer_time: Duration::from_secs(300),
            max_buffer_time: Duration::from_secs(1800),
        }
    }
}

impl From<&crate::conf::Config> for ServiceConfig {
    fn from(config: &crate::conf::Config) -> Self {
        Self {
            data_center: config.generate.data_center,
            step: config.generate.step,
            min_buffer_time: config.store.min_buffer_time(),
            max_buffer_time: config.store.max_buffer_time(),
        }
    }
}

/// Builds the registry key for `(db, table)`.
pub fn segment_key(db: &str, table: &str) -> String {
    format!("{db}|{table}")
}

/// Issue counters, shared with the background task.
#[derive(Debug, Default)]
pub struct Metrics {
    ids_issued: AtomicU64,
    refills: AtomicU64,
    refill_errors: AtomicU64,
    ping_errors: AtomicU64,
}

impl Metrics {
    fn record_issue(&self) {
        self.ids_issued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_refill(&self) {
        self.refills.fetch_add(1, Ordering::Relaxed);
    }

    fn record_refill_error(&self) {
        self.refill_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_ping_error(&self) {
        self.ping_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ids_issued: self.ids_issued.load(Ordering::Relaxed),
            refills: self.refills.load(Ordering::Relaxed),
            refill_errors: self.refill_errors.load(Ordering::Relaxed),
            ping_errors: self.ping_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ids_issued: u64,
    pub refills: u64,
    pub refill_errors: u64,
    pub ping_errors: u64,
}

/// The ID issuing service: one segment per `(db, table)` key, refilled
/// proactively from the coordinator.
///
/// Construction spawns the refill task; [`Service::shutdown`] stops it and
/// waits for it to exit. Dropping a service without shutting down aborts the
/// task.
pub struct Service {
    inner: Arc<ServiceInner>,
    refill_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

struct ServiceInner {
    segments: DashMap<String, Arc<Segment>>,
    store: Arc<dyn Store>,
    config: ServiceConfig,
    metrics: Metrics,
}

impl Service {
    /// Creates the service and starts its refill loop.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self, ServiceError> {
        if i64::from(config.data_center) > DATA_CENTER_MASK {
            return Err(ServiceError::DataCenterOutOfRange(config.data_center));
        }
        let inner = Arc::new(ServiceInner {
            segments: DashMap::new(),
            store,
            config,
            metrics: Metrics::default(),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let refill_task = tokio::spawn(refill_loop(Arc::clone(&inner), shutdown_rx));
        info!(data_center = inner.config.data_center, "id service started");

        Ok(Self {
            inner,
            refill_task: Some(refill_task),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Issues the next ID for `(db, table)`.
    ///
    /// Returns `(id, "")` on success and `(0, message)` on failure. The first
    /// call for a key creates its segment; exactly one caller wins a creation
    /// race and performs the initial reservation inline.
    pub async fn next(&self, db: &str, table: &str) -> (i64, String) {
        self.inner.next(db, table).await
    }

    /// Last ID issued for `key` (`"<db>|<table>"`). Best effort.
    pub fn last(&self, key: &str) -> (i64, String) {
        self.inner.read(key, Segment::last)
    }

    /// IDs still cached locally for `key`. Best effort.
    pub fn remainder(&self, key: &str) -> (i64, String) {
        self.inner.read(key, Segment::len)
    }

    /// Upper bound of every range reserved locally for `key`.
    pub fn max(&self, key: &str) -> (i64, String) {
        self.inner.read(key, Segment::max)
    }

    /// Runs one refill sweep immediately. The background task does the same
    /// every 50 ms; tests call this to observe convergence without waiting.
    pub async fn refill_tick(&self) {
        self.inner.refill_tick().await;
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stops the refill loop and waits for it to exit. Issued segments stay
    /// usable until their caches drain.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.refill_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        if let Some(task) = self.refill_task.take() {
            task.abort();
        }
    }
}

impl ServiceInner {
    async fn next(&self, db: &str, table: &str) -> (i64, String) {
        let key = segment_key(db, table);
        // Drop the map guard before any await or re-entry into the map.
        let existing = self.segments.get(&key).map(|entry| Arc::clone(entry.value()));
        let segment = match existing {
            Some(segment) => segment,
            None => self.create_segment(&key, db, table).await,
        };

        for _ in 0..NEXT_RETRIES {
            match segment.next() {
                Ok(id) => {
                    self.metrics.record_issue();
                    return (id, String::new());
                }
                Err(SegmentError::Empty) => {
                    // Re-check before refilling so a burst of starved callers
                    // does not stampede the coordinator.
                    if segment.need_expand() {
                        debug!(key, "inline refill");
                        if let Err(e) = self.expand(&segment).await {
                            warn!(key, error = %e, "inline refill failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(key, error = %e, len = segment.len(), "issue failed");
                    return (0, e.to_string());
                }
            }
        }
        warn!(key, "issue retries exhausted");
        (0, SegmentError::Empty.to_string())
    }

    /// Registers the segment for `key`, or adopts the one a concurrent caller
    /// registered first. The winner loads the first range inline.
    async fn create_segment(&self, key: &str, db: &str, table: &str) -> Arc<Segment> {
        let fresh = Arc::new(Segment::new(
            self.config.data_center,
            db,
            table,
            self.config.step,
        ));
        let (segment, created) = match self.segments.entry(key.to_string()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&fresh));
                (fresh, true)
            }
        };
        if created {
            debug!(db, table, "segment created, loading first range");
            if let Err(e) = self.expand(&segment).await {
                warn!(db, table, error = %e, "initial refill failed");
            }
        }
        segment
    }

    fn read(&self, key: &str, accessor: impl Fn(&Segment) -> i64) -> (i64, String) {
        match self.segments.get(key) {
            Some(entry) => (accessor(entry.value()), String::new()),
            None => (0, ServiceError::UnknownKey.to_string()),
        }
    }

    /// Reserves the next range from the coordinator and loads it into the
    /// segment. A full ring drops the reservation (logged); coordinator
    /// failures leave the segment untouched.
    async fn expand(&self, segment: &Segment) -> Result<i64, StoreError> {
        let size = self.next_size(segment);
        let reservation = timeout(
            STORE_DEADLINE,
            self.store
                .range(self.config.data_center, segment.db(), segment.table(), size),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout));

        let min = match reservation {
            Ok(min) => min,
            Err(e) => {
                self.metrics.record_refill_error();
                return Err(e);
            }
        };
        if let Err(e) = segment.expand(min, size) {
            warn!(db = segment.db(), table = segment.table(), error = %e, "refill dropped");
        }
        self.metrics.record_refill();
        Ok(min)
    }

    /// Adaptive batch size: double when the segment was refilled again within
    /// `min_buffer_time` (consumers starving), halve when it sat longer than
    /// `max_buffer_time` (consumers saturated), and never leave
    /// `[step, 1024 * step]`.
    fn next_size(&self, segment: &Segment) -> i64 {
        let step = segment.step();
        let elapsed = segment.update_time().elapsed();

        let mut size = step;
        if elapsed < self.config.min_buffer_time {
            size = step * 2;
        } else if elapsed > self.config.max_buffer_time {
            size = step / 2;
        }
        if size < self.config.step || size > self.config.step * MAX_STEP_FACTOR {
            size = step;
        }
        size
    }

    /// One sweep of the background loop: ping the coordinator, then top up
    /// every unblocked segment under the low-water mark.
    async fn refill_tick(&self) {
        let ping = timeout(STORE_DEADLINE, self.store.ping())
            .await
            .unwrap_or(Err(StoreError::Timeout));
        if let Err(e) = ping {
            self.metrics.record_ping_error();
            warn!(error = %e, "coordinator ping failed");
        }

        // Snapshot the registry first: refills await, and the map must not
        // stay locked across those suspension points.
        let segments: Vec<Arc<Segment>> = self
            .segments
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for segment in segments {
            if self
                .store
                .block_db(self.config.data_center, segment.db())
            {
                continue;
            }
            if !segment.need_expand() {
                continue;
            }
            debug!(
                db = segment.db(),
                table = segment.table(),
                len = segment.len(),
                size = segment.step(),
                last = segment.last(),
                "background refill"
            );
            if let Err(e) = self.expand(&segment).await {
                warn!(db = segment.db(), table = segment.table(), error = %e, "background refill failed");
            }
        }
    }
}

async fn refill_loop(inner: Arc<ServiceInner>, mut shutdown_rx: oneshot::Receiver<()>) {
    debug!("refill loop started");
    // First sweep lands one full period after startup; creation already
    // loads each new segment's first range inline.
    let start = tokio::time::Instant::now() + REFILL_INTERVAL;
    let mut interval = tokio::time::interval_at(start, REFILL_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => inner.refill_tick().await,
            _ = &mut shutdown_rx => {
                debug!("refill loop stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rabbitid_store::MemoryStore;

    fn inner(config: ServiceConfig) -> ServiceInner {
        ServiceInner {
            segments: DashMap::new(),
            store: Arc::new(MemoryStore::new()),
            config,
            metrics: Metrics::default(),
        }
    }

    #[test]
    fn test_next_size_doubles_when_starving() {
        let inner = inner(ServiceConfig {
            step: 10,
            min_buffer_time: Duration::from_secs(3600),
            ..ServiceConfig::default()
        });
        let segment = Segment::new(0, "t", "t", 10);
        segment.expand(0, 10).unwrap();
        // Refilled moments ago: demand outruns the batch.
        assert_eq!(inner.next_size(&segment), 20);
    }

    #[test]
    fn test_next_size_halving_respects_floor() {
        let inner = inner(ServiceConfig {
            step: 10,
            min_buffer_time: Duration::ZERO,
            max_buffer_time: Duration::ZERO,
            ..ServiceConfig::default()
        });
        let segment = Segment::new(0, "t", "t", 10);
        segment.expand(0, 10).unwrap();
        // Idle segment wants to halve, but 5 < step: revert to the current
        // step instead.
        assert_eq!(inner.next_size(&segment), 10);
    }

    #[test]
    fn test_next_size_halves_above_floor() {
        let inner = inner(ServiceConfig {
            step: 10,
            min_buffer_time: Duration::ZERO,
            max_buffer_time: Duration::ZERO,
            ..ServiceConfig::default()
        });
        let segment = Segment::new(0, "t", "t", 10);
        segment.expand(0, 40).unwrap();
        assert_eq!(inner.next_size(&segment), 20);
    }

    #[test]
    fn test_next_size_keeps_steady_state() {
        let inner = inner(ServiceConfig {
            step: 10,
            min_buffer_time: Duration::ZERO,
            max_buffer_time: Duration::from_secs(3600),
            ..ServiceConfig::default()
        });
        let segment = Segment::new(0, "t", "t", 10);
        segment.expand(0, 40).unwrap();
        assert_eq!(inner.next_size(&segment), 40);
    }

    #[test]
    fn test_next_size_never_exceeds_ceiling() {
        let step = 10;
        let inner = inner(ServiceConfig {
            step,
            min_buffer_time: Duration::from_secs(3600),
            ..ServiceConfig::default()
        });
        let segment = Segment::new(0, "t", "t", step);
        segment.expand(0, step).unwrap();

        // Repeated starvation doubles up to the cap, then holds.
        let mut size = step;
        let mut min = step;
        for _ in 0..20 {
            size = inner.next_size(&segment);
            assert!(size >= step && size <= step * MAX_STEP_FACTOR);
            segment.expand(min, size).unwrap();
            min += size;
        }
        assert_eq!(size, step * MAX_STEP_FACTOR);
        assert_eq!(inner.next_size(&segment), step * MAX_STEP_FACTOR);
    }

    #[test]
    fn test_segment_key_format() {
        assert_eq!(segment_key("comment", "next"), "comment|next");
    }
}
