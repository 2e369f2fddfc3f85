//! Cache maintenance - evicts least requested entries down to the byte budget
//! and prefetches what the access log says is popular
//!
//! Environment variables:
//! - ACCESS_LOG: web server access log to rank entries by (required)
//! - ACCESS_ROUTE_PREFIX: request path prefix of file routes (default: "/files/")
//! - CACHE_MAX_SIZE: byte budget (default: 1 GiB)
//! - everything `StoreConfig::from_env` reads; `STORE_BACKEND` must be `remote-cached`

use anyhow::{bail, Context, Result};
use image_store::{logging, AccessLog, BackendKind, RemoteObjectStore, StoreConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = StoreConfig::from_env().context("Failed to load configuration")?;
    if config.backend != BackendKind::RemoteCached {
        bail!("cache-manage needs STORE_BACKEND=remote-cached");
    }

    let log_path = std::env::var("ACCESS_LOG").context("ACCESS_LOG not set")?;
    let route_prefix =
        std::env::var("ACCESS_ROUTE_PREFIX").unwrap_or_else(|_| "/files/".to_string());

    let raw = tokio::fs::read_to_string(&log_path)
        .await
        .with_context(|| format!("Failed to read access log {log_path}"))?;
    let access_log = AccessLog::from_lines(raw.lines(), &route_prefix);
    info!(
        path = %log_path,
        identities = access_log.len(),
        "Access log loaded"
    );

    let store = RemoteObjectStore::from_config(&config)
        .await
        .context("Failed to build remote store")?;
    let (managed, warmed) = store
        .manage_cache(&access_log, config.cache.max_size)
        .await
        .context("Cache maintenance failed")?;

    info!(
        evicted = managed.evicted.len(),
        bytes_before = managed.bytes_before,
        bytes_after = managed.bytes_after,
        prefetched = warmed.fetched.len(),
        prefetch_failed = warmed.failed.len(),
        "Done"
    );
    Ok(())
}
