//! Caching layer: tiered read resolution and the priority write buffer,
//! plus the eviction cache cleanup task.

pub mod resolution;
pub mod write_buffer;

pub use resolution::{ContentResolver, ResolutionResult, ResolutionStats, ResolverConfig, SourceTier};
pub use write_buffer::{
    start_flush_task, FlushHandle, WriteBuffer, WriteBufferConfig, WriteFailure, WriteOp,
    WritePriority, WriteStats,
};

use std::sync::Arc;
use std::time::Duration;

use reach_cache_core::EvictionCache;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Handle to the periodic cleanup task
pub struct CleanupHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl CleanupHandle {
    /// Signal shutdown and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

/// Spawn a periodic task that expires idle entries from every reach pool.
pub fn spawn_cache_cleanup_task(cache: Arc<EvictionCache>, interval: Duration) -> CleanupHandle {
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Cache cleanup task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let now_ms = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or(0);
                    let removed = cache.cleanup_all_reaches(now_ms);
                    if removed > 0 {
                        debug!(removed = removed, "Expired idle cache entries");
                    }
                }
            }
        }
    });

    CleanupHandle { shutdown_tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_cache_core::EvictionCacheConfig;

    #[tokio::test]
    async fn cleanup_task_shuts_down_cleanly() {
        let mut config = EvictionCacheConfig::uniform(1_000);
        config.entry_ttl_ms = Some(1);
        let cache = Arc::new(EvictionCache::new(config));

        let handle = spawn_cache_cleanup_task(Arc::clone(&cache), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown().await;
    }
}
