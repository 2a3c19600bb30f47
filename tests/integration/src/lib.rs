//! Integration tests for the MaxIOFS replication core.
//!
//! Everything runs in-process: the in-memory metadata and object stores
//! back the bucket manager and the replication source, the relational
//! store runs on in-memory SQLite, and the remote destination is the
//! in-memory S3 double. No network, no external services.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use maxiofs_bucket::{BucketConfig, BucketManager};
use maxiofs_core::metadata::put_json;
use maxiofs_core::object_store::compute_etag;
use maxiofs_core::types::{ObjectRecord, object_record_key, physical_key};
use maxiofs_core::{
    CoreResult, MemoryMetadataStore, MemoryObjectStore, ObjectSource, ObjectStore, StoredObject,
    StoreObjectSource,
};
use maxiofs_replication::{
    MemoryRemoteClientFactory, MemoryRemoteStore, QueueAction, ReplicationConfig,
    ReplicationEngine, ReplicationStore, RuleMetrics,
};

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Unquoted hex MD5 of a payload, for byte-equality assertions.
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    compute_etag(data)
}

/// Replication config tuned for tests: tight loops, immediate retries.
#[must_use]
pub fn fast_replication_config() -> ReplicationConfig {
    ReplicationConfig::builder()
        .worker_count(3)
        .queue_size(64)
        .batch_size(32)
        .retry_interval_secs(0)
        .load_interval_secs(1)
        .schedule_tick_secs(1)
        .build()
}

/// One in-process MaxIOFS node plus an in-memory remote destination.
#[derive(Debug)]
pub struct TestCluster {
    /// The KV metadata store.
    pub metadata: Arc<MemoryMetadataStore>,
    /// The payload backend.
    pub objects: Arc<MemoryObjectStore>,
    /// The bucket metadata manager.
    pub manager: Arc<BucketManager>,
    /// The replication engine.
    pub engine: Arc<ReplicationEngine>,
    /// The in-memory destination the engine replicates into.
    pub destination: Arc<MemoryRemoteStore>,
}

impl TestCluster {
    /// Build a cluster with the fast test config.
    pub async fn new() -> Self {
        Self::with_config(fast_replication_config()).await
    }

    /// Build a cluster with a custom replication config.
    pub async fn with_config(config: ReplicationConfig) -> Self {
        init_tracing();

        let metadata = Arc::new(MemoryMetadataStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let source = Arc::new(StoreObjectSource::new(metadata.clone(), objects.clone()));
        Self::assemble(metadata, objects, source, config).await
    }

    /// Build a cluster whose replication source can be paused inside
    /// listings, for sync-exclusion tests.
    pub async fn with_gated_source() -> (Self, Arc<GatedSource>) {
        init_tracing();

        let metadata = Arc::new(MemoryMetadataStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let gated = Arc::new(GatedSource::new(StoreObjectSource::new(
            metadata.clone(),
            objects.clone(),
        )));
        let cluster = Self::assemble(
            metadata,
            objects,
            gated.clone(),
            fast_replication_config(),
        )
        .await;
        (cluster, gated)
    }

    async fn assemble(
        metadata: Arc<MemoryMetadataStore>,
        objects: Arc<MemoryObjectStore>,
        source: Arc<dyn ObjectSource>,
        config: ReplicationConfig,
    ) -> Self {
        let manager = Arc::new(BucketManager::new(
            metadata.clone(),
            objects.clone(),
            BucketConfig::default(),
        ));

        let store = Arc::new(
            ReplicationStore::in_memory()
                .await
                .unwrap_or_else(|e| panic!("replication store failed: {e}")),
        );
        let destination = MemoryRemoteStore::new();
        let factory = Arc::new(MemoryRemoteClientFactory::new(destination.clone()));
        let engine = Arc::new(ReplicationEngine::new(store, source, factory, config));

        Self {
            metadata,
            objects,
            manager,
            engine,
            destination,
        }
    }

    /// Write an object the way the front end would: payload, metadata
    /// record, and a metric delta on the bucket.
    pub async fn write_object(&self, tenant: &str, bucket: &str, key: &str, data: &[u8]) {
        let summary = self
            .objects
            .put_object(
                &physical_key(tenant, bucket, key),
                Bytes::copy_from_slice(data),
                None,
                &HashMap::new(),
            )
            .await
            .unwrap_or_else(|e| panic!("payload write failed: {e}"));
        put_json(
            self.metadata.as_ref(),
            &object_record_key(tenant, bucket, key),
            &ObjectRecord::live(key, &summary.etag, summary.size),
        )
        .await
        .unwrap_or_else(|e| panic!("record write failed: {e}"));
        self.manager
            .increment_object_count(tenant, bucket, summary.size)
            .await
            .unwrap_or_else(|e| panic!("metric update failed: {e}"));
    }

    /// Write an object and queue it for replication, mirroring the full
    /// mutation path.
    pub async fn upload(&self, tenant: &str, bucket: &str, key: &str, data: &[u8]) {
        self.write_object(tenant, bucket, key, data).await;
        self.engine
            .queue_object(tenant, bucket, key, QueueAction::Put)
            .await
            .unwrap_or_else(|e| panic!("queue_object failed: {e}"));
    }

    /// Poll until the rule reaches `expected` completed rows (or panic
    /// after ~5 s).
    pub async fn wait_for_completed(&self, rule_id: &str, expected: i64) -> RuleMetrics {
        for _ in 0..100 {
            let metrics = self
                .engine
                .get_metrics(rule_id)
                .await
                .unwrap_or_else(|e| panic!("metrics failed: {e}"));
            if metrics.completed_objects >= expected {
                return metrics;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("rule {rule_id} never reached {expected} completed rows");
    }
}

// ---------------------------------------------------------------------------
// GatedSource
// ---------------------------------------------------------------------------

/// [`ObjectSource`] wrapper whose listings block until released; lets a
/// test hold a sync mid-flight deterministically.
pub struct GatedSource {
    inner: StoreObjectSource,
    entered: tokio::sync::Notify,
    gate: tokio::sync::Semaphore,
}

impl std::fmt::Debug for GatedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatedSource").finish()
    }
}

impl GatedSource {
    /// Wrap a source; listings block until [`GatedSource::open`].
    #[must_use]
    pub fn new(inner: StoreObjectSource) -> Self {
        Self {
            inner,
            entered: tokio::sync::Notify::new(),
            gate: tokio::sync::Semaphore::new(0),
        }
    }

    /// Wait until some listing has entered and is now blocked.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Release all current and future listings.
    pub fn open(&self) {
        self.gate.add_permits(1 << 20);
    }
}

#[async_trait]
impl ObjectSource for GatedSource {
    async fn read(&self, tenant_id: &str, bucket: &str, key: &str) -> CoreResult<StoredObject> {
        self.inner.read(tenant_id, bucket, key).await
    }

    async fn list(
        &self,
        tenant_id: &str,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> CoreResult<Vec<String>> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .unwrap_or_else(|e| panic!("gate closed: {e}"));
        self.inner.list(tenant_id, bucket, prefix, max_keys).await
    }
}

mod test_bucket;
mod test_policy;
mod test_replication;
