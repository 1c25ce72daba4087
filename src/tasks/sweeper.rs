//! TTL Sweeper Task
//!
//! Background task that periodically evicts expired cache entries, a
//! bounded batch per tick, so that it never holds the cache lock for long.

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::cache::TtlCache;
use crate::error::{CacheError, Result};

/// Spawns the sweeper for `cache` on the current tokio runtime.
///
/// The task wakes every `sweep_interval` and calls
/// [`TtlCache::sweep_expired`]. It stops when the cache is shut down (and
/// then releases the cache's structures) or when every handle to the cache
/// has been dropped.
///
/// # Returns
/// A JoinHandle for the spawned task, or [`CacheError::NoRuntime`] when
/// called outside a tokio runtime.
pub fn spawn_sweeper<K, V>(cache: &TtlCache<K, V>) -> Result<JoinHandle<()>>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    let runtime = Handle::try_current().map_err(|e| CacheError::NoRuntime(e.to_string()))?;
    let interval = cache.config().sweep_interval;
    let mut shutdown = cache.shutdown_signal();
    let weak = cache.downgrade();

    Ok(runtime.spawn(async move {
        info!("Starting TTL sweeper with interval of {:?}", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let Some(cache) = weak.upgrade() else {
                break;
            };
            if cache.is_closed() {
                cache.release();
                break;
            }

            let removed = cache.sweep_expired();
            if removed > 0 {
                debug!("TTL sweep: removed {} expired entries", removed);
            } else {
                trace!("TTL sweep: no expired entries found");
            }
        }

        info!("TTL sweeper stopped");
    }))
}
