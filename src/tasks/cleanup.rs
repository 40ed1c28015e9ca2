//! Expiry Sweep Task
//!
//! Background task that periodically removes expired records from the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::FileConnector;
use crate::error::CacheError;

/// Spawns a background task that periodically purges expired records.
///
/// Each sweep runs on the blocking pool since it performs a store write
/// transaction. The task ends on its own once the connector is closed;
/// otherwise abort the returned handle to stop it.
///
/// # Arguments
/// * `connector` - Shared connector whose store is swept
/// * `cleanup_interval_secs` - Interval in seconds between sweeps, at least 1
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let connector = Arc::new(FileConnector::new("store/cache.db"));
/// connector.open()?;
/// let cleanup_handle = spawn_cleanup_task(connector.clone(), 1);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(
    connector: Arc<FileConnector>,
    cleanup_interval_secs: u64,
) -> JoinHandle<()> {
    let cleanup_interval_secs = cleanup_interval_secs.max(1);
    let interval = Duration::from_secs(cleanup_interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep with interval of {} seconds",
            cleanup_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let sweeper = connector.clone();
            let outcome = tokio::task::spawn_blocking(move || sweeper.purge_expired()).await;

            match outcome {
                Ok(Ok(0)) => debug!("Expiry sweep: no expired entries found"),
                Ok(Ok(removed)) => info!("Expiry sweep: removed {} expired entries", removed),
                Ok(Err(CacheError::NotConnected)) => {
                    info!("Expiry sweep stopped: store closed");
                    break;
                }
                Ok(Err(e)) => warn!("Expiry sweep failed: {}", e),
                Err(e) => warn!("Expiry sweep panicked: {}", e),
            }
        }
    })
}
