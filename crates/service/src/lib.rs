//! ID issuing service.
//!
//! Glues the lock-free [`Segment`](rabbitid_segment::Segment) allocator to a
//! [`Store`](rabbitid_store::Store) coordinator: a process-wide registry maps
//! each `"<db>|<table>"` key to its segment, a background task keeps every
//! segment stocked ahead of demand, and an adaptive batch size tracks the
//! observed consumption rate.
//!
//! # Example
//!
//! ```
//! use rabbitid_service::{Service, ServiceConfig};
//! use rabbitid_store::MemoryStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//! let mut svc = Service::new(store, ServiceConfig::default()).unwrap();
//!
//! let (id, msg) = svc.next("orders", "invoice").await;
//! assert_eq!((id, msg.as_str()), (1, ""));
//!
//! svc.shutdown().await;
//! # }
//! ```

pub mod conf;
mod service;

pub use service::{
    segment_key, Metrics, MetricsSnapshot, Service, ServiceConfig, ServiceError,
};
