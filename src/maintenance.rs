use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that compacts the WAL once enough appends pile up,
/// and drops notification channels nobody listens to any more.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
        let pruned = engine.notify.prune();
        if pruned > 0 {
            debug!("pruned {pruned} idle notification channels");
        }
    }
}

/// One compactor pass. Returns whether the WAL was rewritten.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NewUser;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staydb_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn register(engine: &Engine, n: usize) {
        engine
            .register_user(NewUser {
                id: Ulid::new(),
                email: format!("user{n}@example.com"),
                first_name: "Meera".into(),
                last_name: "Iyer".into(),
                phone: None,
                is_host: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let engine = Engine::new(test_wal_path("threshold.wal"), Arc::new(NotifyHub::new())).unwrap();
        for n in 0..3 {
            register(&engine, n).await;
        }
        assert!(!compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        for n in 3..6 {
            register(&engine, n).await;
        }
        assert!(compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_users().len(), 6);
    }
}
