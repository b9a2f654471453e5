//! TTL Cleanup Task
//!
//! Expired entries are already ignored on read; the sweep keeps entries nobody
//! reads again from holding capacity.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::SharedCache;

/// Spawns a task that removes expired entries from `cache` every
/// `cleanup_interval_secs` seconds.
///
/// # Arguments
/// * `cache` - Cache shared with the client
/// * `cleanup_interval_secs` - Seconds between sweeps
///
/// # Returns
/// The task handle. Abort it to stop the sweeps.
pub fn spawn_cleanup_task(cache: SharedCache, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "starting cache sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let (removed, remaining) = {
                let mut cache = cache.write().await;
                let removed = cache.cleanup_expired();
                (removed, cache.len())
            };

            if removed > 0 {
                info!(removed, remaining, "cache sweep removed expired entries");
            } else {
                debug!(remaining, "cache sweep found nothing to remove");
            }
        }
    })
}
