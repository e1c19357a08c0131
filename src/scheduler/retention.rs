//! Retention manager for cleaning up old probe results.

use crate::config::MAX_RETENTION_DAYS;
use crate::db::{DbError, Store};

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Manager for deleting results past the retention period.
pub struct RetentionManager {
    store: Arc<Store>,
    retention: ChronoDuration,
    every: Duration,
    stop: Mutex<Option<broadcast::Sender<()>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, retention_days: i64, every: Duration) -> Self {
        Self {
            store,
            retention: ChronoDuration::days(retention_days.clamp(1, MAX_RETENTION_DAYS)),
            every,
            stop: Mutex::new(None),
        }
    }

    /// Start the retention background task. The first prune runs immediately.
    pub fn start(&self) {
        // Installed before spawning so a stop issued right away is never lost.
        let (tx, mut rx) = broadcast::channel(1);
        *self.stop.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);

        let store = self.store.clone();
        let retention = self.retention;
        let every = self.every;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                tokio::select! {
                    biased;
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        let store = store.clone();
                        let pruned = tokio::task::spawn_blocking(move || process_retention(&store, retention)).await;
                        match pruned {
                            Ok(Ok(count)) => {
                                tracing::info!("RetentionManager: Pruned {} probe results", count)
                            }
                            Ok(Err(e)) => tracing::error!("RetentionManager: Prune failed: {}", e),
                            Err(e) => tracing::error!("RetentionManager: Prune task failed: {}", e),
                        }
                    }
                }
            }

            tracing::debug!("RetentionManager: stopped");
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        let stop = self.stop.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

fn process_retention(store: &Store, retention: ChronoDuration) -> Result<usize, DbError> {
    let cutoff = Utc::now() - retention;
    tracing::debug!("RetentionManager: Deleting results older than {}", cutoff);
    store.prune_before(cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewTarget, ProbeResult, ResultFilter};
    use tempfile::NamedTempFile;

    fn seeded_store(tmp: &NamedTempFile) -> Arc<Store> {
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let target = store.add_target(&NewTarget::new("SG", "8.8.8.8", 53)).unwrap();
        let now = Utc::now();
        for days in [1, 29, 31, 45] {
            store
                .append_result(&ProbeResult::success(&target, 10.0, now - ChronoDuration::days(days)))
                .unwrap();
        }
        store
    }

    fn remaining(store: &Store) -> usize {
        let now = Utc::now();
        store
            .query_results(&ResultFilter::between(now - ChronoDuration::days(365), now))
            .unwrap()
            .len()
    }

    #[test]
    fn test_prune_uses_retention_window() {
        let tmp = NamedTempFile::new().unwrap();
        let store = seeded_store(&tmp);

        assert_eq!(process_retention(&store, ChronoDuration::days(30)).unwrap(), 2);
        assert_eq!(remaining(&store), 2);
        assert_eq!(process_retention(&store, ChronoDuration::days(30)).unwrap(), 0);
    }

    #[test]
    fn test_out_of_range_retention_is_clamped() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());

        let manager = RetentionManager::new(store.clone(), i64::MAX / 1000, Duration::from_secs(60));
        assert_eq!(manager.retention, ChronoDuration::days(MAX_RETENTION_DAYS));

        let manager = RetentionManager::new(store, -3, Duration::from_secs(60));
        assert_eq!(manager.retention, ChronoDuration::days(1));
    }

    #[tokio::test]
    async fn test_stop_right_after_start_is_not_lost() {
        let tmp = NamedTempFile::new().unwrap();
        let store = seeded_store(&tmp);
        let manager = RetentionManager::new(store.clone(), 7, Duration::from_secs(3600));

        manager.start();
        manager.stop().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(remaining(&store), 4);
    }

    #[tokio::test]
    async fn test_background_prune_runs_on_start() {
        let tmp = NamedTempFile::new().unwrap();
        let store = seeded_store(&tmp);
        let manager = RetentionManager::new(store.clone(), 7, Duration::from_secs(3600));

        manager.start();
        for _ in 0..50 {
            if remaining(&store) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remaining(&store), 1);
        manager.stop().await;
    }
}
