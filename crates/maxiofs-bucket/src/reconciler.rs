//! Background metrics reconciler.
//!
//! Cached `(object_count, total_size)` counters are maintained by delta
//! updates on the hot path; this task periodically rebuilds every bucket's
//! counters from the object records, catching any drift.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::manager::BucketManager;

/// Handle to the running reconciler task.
///
/// Dropping the handle without calling [`MetricsReconciler::shutdown`]
/// leaves the task running until the runtime shuts down.
#[derive(Debug)]
pub struct MetricsReconciler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MetricsReconciler {
    /// Spawn the reconciler, rebuilding every bucket's metrics on each
    /// interval tick.
    #[must_use]
    pub fn spawn(manager: Arc<BucketManager>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the immediate first tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        reconcile_all(&manager).await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("metrics reconciler stopping");
                        return;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the reconciler and wait for the task to finish.
    pub async fn shutdown(self) {
        // The receiver may already be gone if the task exited.
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.handle.await {
            warn!(error = %err, "reconciler task join failed");
        }
    }
}

/// One reconciliation pass over every bucket of every tenant.
async fn reconcile_all(manager: &BucketManager) {
    let buckets = match manager.all_buckets().await {
        Ok(buckets) => buckets,
        Err(err) => {
            warn!(error = %err, "reconciler could not enumerate buckets");
            return;
        }
    };

    for (tenant_id, name) in buckets {
        match manager.recalculate_metrics(&tenant_id, &name).await {
            Ok(metrics) => {
                debug!(
                    tenant_id,
                    bucket = %name,
                    objects = metrics.object_count,
                    bytes = metrics.total_size,
                    "metrics reconciled"
                );
            }
            Err(err) => warn!(tenant_id, bucket = %name, error = %err, "reconcile failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BucketConfig;
    use bytes::Bytes;
    use maxiofs_core::types::{ObjectRecord, physical_key};
    use maxiofs_core::{MemoryMetadataStore, MemoryObjectStore, ObjectStore};
    use std::collections::HashMap;

    async fn manager_with_bucket() -> Arc<BucketManager> {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let manager = Arc::new(BucketManager::new(
            metadata,
            objects.clone(),
            BucketConfig::default(),
        ));
        manager
            .create_bucket("t1", "watched", None)
            .await
            .unwrap_or_else(|e| panic!("create failed: {e}"));

        // One live object whose delta was never applied to the counters.
        let summary = objects
            .put_object(
                &physical_key("t1", "watched", "data.bin"),
                Bytes::from_static(b"12345678"),
                None,
                &HashMap::new(),
            )
            .await
            .unwrap_or_else(|e| panic!("seed failed: {e}"));
        manager
            .put_object_record(
                "t1",
                "watched",
                &ObjectRecord::live("data.bin", &summary.etag, summary.size),
            )
            .await
            .unwrap_or_else(|e| panic!("record failed: {e}"));
        manager
    }

    #[tokio::test]
    async fn test_should_correct_drift_on_tick() {
        let manager = manager_with_bucket().await;
        let reconciler = MetricsReconciler::spawn(manager.clone(), Duration::from_millis(20));

        // Wait for at least one pass.
        tokio::time::sleep(Duration::from_millis(120)).await;
        reconciler.shutdown().await;

        let info = manager
            .get_bucket_info("t1", "watched")
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(info.metrics.object_count, 1);
        assert_eq!(info.metrics.total_size, 8);
    }

    #[tokio::test]
    async fn test_should_stop_promptly_on_shutdown() {
        let manager = manager_with_bucket().await;
        let reconciler = MetricsReconciler::spawn(manager, Duration::from_secs(3600));

        // Shutdown must not wait for the next tick.
        tokio::time::timeout(Duration::from_secs(1), reconciler.shutdown())
            .await
            .unwrap_or_else(|_| panic!("shutdown timed out"));
    }
}
