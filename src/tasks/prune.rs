//! Periodic Prune Task
//!
//! Background task that periodically asks a cache to remove expired
//! entries, so expiration does not depend solely on lazy eviction at fetch
//! time.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Cache;

/// Spawns a background task that calls `prune` on the given cache at a
/// fixed interval.
///
/// Works against any backend, including a [`crate::ChainCache`] (the prune
/// fans out) and a cluster backend (whose prune is a deliberate no-op).
///
/// # Arguments
/// * `cache` - Shared handle to the cache to prune
/// * `interval_secs` - Interval in seconds between prune passes
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_prune_task(cache: Arc<dyn Cache>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        info!(interval_secs, "starting cache prune task");

        loop {
            tokio::time::sleep(interval).await;
            cache.prune().await;
            debug!("cache prune pass complete");
        }
    })
}
