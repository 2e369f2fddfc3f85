//! Cache warm-up - downloads every original under the key prefix that is not
//! cached locally yet
//!
//! Environment variables: see `StoreConfig::from_env`. `STORE_BACKEND` must be
//! `remote-cached`.

use anyhow::{bail, Context, Result};
use image_store::{logging, BackendKind, RemoteObjectStore, StoreConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = StoreConfig::from_env().context("Failed to load configuration")?;
    if config.backend != BackendKind::RemoteCached {
        bail!("cache-warm needs STORE_BACKEND=remote-cached");
    }

    let store = RemoteObjectStore::from_config(&config)
        .await
        .context("Failed to build remote store")?;
    info!(cache_dir = ?config.cache.dir, "Warming cache");

    let report = store.warm(None).await.context("Cache warm failed")?;
    for (identity, error) in &report.failed {
        warn!(identity = %identity, error = %error, "Not cached");
    }
    info!(
        fetched = report.fetched.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Done"
    );

    if !report.failed.is_empty() {
        bail!("{} objects could not be cached", report.failed.len());
    }
    Ok(())
}
