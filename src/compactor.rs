use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::{StoreError, WalStore};
use crate::tenant::TenantEngine;

const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Rewrite the WAL once at least `threshold` appends have piled up since the
/// last compaction. Returns whether a compaction ran.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    let started = std::time::Instant::now();
    store.compact().await?;
    info!(
        appends,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "WAL compacted"
    );
    Ok(true)
}

/// Background task that keeps one tenant's WAL from growing without bound.
pub async fn run_compactor(engine: Arc<TenantEngine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        match compact_if_due(engine.store(), threshold).await {
            Ok(true) => {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL, "status" => "ok")
                    .increment(1);
            }
            Ok(false) => {}
            Err(e) => {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL, "status" => "error")
                    .increment(1);
                warn!(error = %e, "WAL compaction failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProfessionalDraft;
    use crate::store::Store;

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("cadence_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn register(store: &WalStore, n: usize) {
        for i in 0..n {
            store
                .insert_professional(ProfessionalDraft {
                    name: format!("p{i}"),
                    email: format!("p{i}-{}@clinic.test", ulid::Ulid::new()),
                    phone: None,
                    cancellation_window_hours: 24,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn below_threshold_does_nothing() {
        let store = WalStore::open(test_wal_path("below.wal")).unwrap();
        register(&store, 3).await;
        assert!(!compact_if_due(&store, 10).await.unwrap());
        assert_eq!(store.wal_appends_since_compact().await, 3);
    }

    #[tokio::test]
    async fn at_threshold_compacts_and_resets() {
        let path = test_wal_path("at.wal");
        let store = WalStore::open(path.clone()).unwrap();
        register(&store, 5).await;
        assert!(compact_if_due(&store, 5).await.unwrap());
        assert_eq!(store.wal_appends_since_compact().await, 0);

        let reopened = WalStore::open(path).unwrap();
        assert_eq!(reopened.professionals().await.unwrap().len(), 5);
    }
}
