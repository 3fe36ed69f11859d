//! End-to-end demo: config -> coordinator -> service, issuing IDs locally.
//!
//! The wire transports are separate deployables, so the demo drives the
//! service API directly against the in-memory coordinator.
//!
//! ```bash
//! cargo run -p rabbitid-service --bin demo -- [path/to/rabbitid.toml]
//! ```

use rabbitid_service::{conf::Config, segment_key, Service, ServiceConfig};
use rabbitid_store::{MemoryStore, Store};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    init_logging(&config)?;

    tracing::info!(
        addr = %config.server.addr,
        store = %config.store.kind,
        uri = %config.store.uri(),
        "configured backend not dialed here; demo runs on the in-memory coordinator"
    );

    let store = Arc::new(MemoryStore::new());
    store.init(config.generate.data_center).await?;
    let mut service = Service::new(store, ServiceConfig::from(&config))?;

    let (db, table) = ("demo", "order");
    for _ in 0..10 {
        let (id, msg) = service.next(db, table).await;
        if msg.is_empty() {
            println!("issued {id}");
        } else {
            eprintln!("issue failed: {msg}");
        }
    }

    let key = segment_key(db, table);
    let (last, _) = service.last(&key);
    let (remainder, _) = service.remainder(&key);
    let (max, _) = service.max(&key);
    println!("last={last} remainder={remainder} max={max}");
    println!("metrics: {:?}", service.metrics());

    service.shutdown().await;
    Ok(())
}

fn init_logging(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log.path.is_empty() {
        builder.with_writer(std::io::stderr).init();
    } else {
        let file = std::fs::File::create(&config.log.path)?;
        builder.with_writer(Arc::new(file)).init();
    }
    Ok(())
}
