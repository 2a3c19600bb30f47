//! The bucket metadata manager.
//!
//! All bucket state flows through [`BucketManager`]: descriptor CRUD,
//! validated subresource updates, metric deltas, and the emptiness protocol
//! that gates bucket deletion.
//!
//! Metric updates for one bucket are serialized through a per-bucket
//! `tokio::sync::Mutex` held across the read-modify-write of the
//! descriptor. Lock entries are created lazily and never removed.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use maxiofs_core::metadata::{MetadataStore, get_json, put_json};
use maxiofs_core::object_store::ObjectStore;
use maxiofs_core::types::{self, ObjectRecord, Owner};
use maxiofs_core::{CoreError, StoredObject};
use maxiofs_policy::{AccessRequest, Decision, PolicyDocument, evaluate, parse_policy};

use crate::config::BucketConfig;
use crate::descriptor::{
    BucketDescriptor, BucketMetrics, CannedAcl, CorsRuleConfig, LifecycleRule, ObjectLockConfig,
    Tag, VersioningState, validate_cors, validate_lifecycle, validate_tags,
};
use crate::error::{BucketError, BucketResult};
use crate::validation::validate_bucket_name;

/// KV key of the cluster-wide bucket-name index entry.
fn global_name_key(name: &str) -> String {
    format!("bucketname:{name}")
}

/// Authoritative manager of bucket descriptors, subresources, and metrics.
pub struct BucketManager {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    config: BucketConfig,
    /// Per-bucket metric serialization, keyed by `(tenant, bucket)`.
    metric_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl std::fmt::Debug for BucketManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BucketManager {
    /// Create a manager over the given stores.
    #[must_use]
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        config: BucketConfig,
    ) -> Self {
        Self {
            metadata,
            objects,
            config,
            metric_locks: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Bucket lifecycle
    // -----------------------------------------------------------------------

    /// Create a bucket.
    ///
    /// Persists the descriptor, claims the cluster-wide name, and emits the
    /// zero-byte bucket marker in the object store. The owner defaults to
    /// the tenant itself unless `owner_id` is given.
    ///
    /// # Errors
    ///
    /// - [`BucketError::InvalidBucketName`] if the name violates the rules.
    /// - [`BucketError::BucketAlreadyExists`] if the name is taken anywhere
    ///   in the cluster, including by another tenant.
    pub async fn create_bucket(
        &self,
        tenant_id: &str,
        name: &str,
        owner_id: Option<&str>,
    ) -> BucketResult<BucketDescriptor> {
        validate_bucket_name(name)?;

        if self.metadata.get(&global_name_key(name)).await?.is_some() {
            return Err(BucketError::BucketAlreadyExists {
                bucket: name.to_owned(),
            });
        }

        let owner = Owner::resolve(tenant_id, owner_id);
        let descriptor =
            BucketDescriptor::new(tenant_id, name, &self.config.default_region, owner);

        // Marker first: a descriptor must never exist without its marker.
        let marker_meta: HashMap<String, String> = [
            (
                "bucket-created".to_owned(),
                descriptor.created_at.to_rfc3339(),
            ),
            ("tenant-id".to_owned(), tenant_id.to_owned()),
        ]
        .into();
        self.objects
            .put_object(
                &types::physical_key(tenant_id, name, types::BUCKET_MARKER_FILE),
                Bytes::new(),
                None,
                &marker_meta,
            )
            .await?;

        self.store_descriptor(&descriptor).await?;
        self.metadata
            .put(&global_name_key(name), tenant_id.as_bytes().to_vec())
            .await?;

        info!(tenant_id, bucket = name, "bucket created");
        Ok(descriptor)
    }

    /// Delete a bucket if it is logically empty.
    ///
    /// Runs the emptiness protocol: physical files without a metadata
    /// record, and files whose record is a delete marker, are orphans and
    /// are cleaned up; any live object aborts the deletion.
    ///
    /// # Errors
    ///
    /// - [`BucketError::BucketNotFound`] if the bucket does not exist.
    /// - [`BucketError::BucketNotEmpty`] if a live object remains, or any
    ///   record read fails (the check fails closed).
    pub async fn delete_bucket(&self, tenant_id: &str, name: &str) -> BucketResult<()> {
        let _descriptor = self.load_descriptor(tenant_id, name).await?;

        if !self.ensure_empty(tenant_id, name).await? {
            return Err(BucketError::BucketNotEmpty {
                bucket: name.to_owned(),
            });
        }

        self.remove_bucket_remnants(tenant_id, name).await?;
        info!(tenant_id, bucket = name, "bucket deleted");
        Ok(())
    }

    /// Delete a bucket and everything in it (admin-only path).
    ///
    /// # Errors
    ///
    /// - [`BucketError::BucketNotFound`] if the bucket does not exist.
    /// - [`BucketError::ObjectLockProtected`] if object lock is enabled and
    ///   any object carries unexpired retention.
    pub async fn force_delete_bucket(&self, tenant_id: &str, name: &str) -> BucketResult<()> {
        let descriptor = self.load_descriptor(tenant_id, name).await?;

        if descriptor.object_lock_enabled() {
            let now = Utc::now();
            for record in self.scan_object_records(tenant_id, name).await? {
                if !record.is_delete_marker() && record.is_retained_at(now) {
                    return Err(BucketError::ObjectLockProtected {
                        bucket: name.to_owned(),
                    });
                }
            }
        }

        // Payloads, then records, then the bucket itself.
        let prefix = types::physical_prefix(tenant_id, name);
        for entry in self.objects.list_objects(&prefix, usize::MAX).await? {
            self.objects.delete_object(&entry.key).await?;
        }
        self.remove_bucket_remnants(tenant_id, name).await?;

        info!(tenant_id, bucket = name, "bucket force-deleted");
        Ok(())
    }

    /// List a tenant's buckets, sorted by name.
    pub async fn list_buckets(&self, tenant_id: &str) -> BucketResult<Vec<BucketDescriptor>> {
        let keys = self
            .metadata
            .list_keys(&types::bucket_prefix(tenant_id))
            .await?;

        let mut buckets = Vec::with_capacity(keys.len());
        for key in keys {
            buckets.push(get_json::<BucketDescriptor>(self.metadata.as_ref(), &key).await?);
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    /// Enumerate every `(tenant, bucket)` pair in the cluster.
    ///
    /// Used by the metrics reconciler; tenant-facing callers should use
    /// [`BucketManager::list_buckets`].
    pub async fn all_buckets(&self) -> BucketResult<Vec<(String, String)>> {
        let keys = self.metadata.list_keys("bucket:").await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix("bucket:"))
            .filter_map(|rest| rest.split_once(':'))
            .map(|(tenant, name)| (tenant.to_owned(), name.to_owned()))
            .collect())
    }

    /// Fetch one bucket's descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::BucketNotFound`] if the bucket does not exist.
    pub async fn get_bucket_info(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> BucketResult<BucketDescriptor> {
        self.load_descriptor(tenant_id, name).await
    }

    // -----------------------------------------------------------------------
    // Policy
    // -----------------------------------------------------------------------

    /// Fetch the bucket policy.
    ///
    /// # Errors
    ///
    /// [`BucketError::NoSuchPolicy`] when none is configured.
    pub async fn get_policy(&self, tenant_id: &str, name: &str) -> BucketResult<PolicyDocument> {
        let descriptor = self.load_descriptor(tenant_id, name).await?;
        descriptor.policy.ok_or_else(|| BucketError::NoSuchPolicy {
            bucket: name.to_owned(),
        })
    }

    /// Set the bucket policy from its JSON representation.
    ///
    /// The document is parsed and validated before anything is persisted.
    pub async fn set_policy(&self, tenant_id: &str, name: &str, json: &str) -> BucketResult<()> {
        let document = parse_policy(json)?;
        self.update_descriptor(tenant_id, name, |descriptor| {
            descriptor.policy = Some(document);
            Ok(())
        })
        .await
    }

    /// Remove the bucket policy. Removing an absent policy is a no-op.
    pub async fn delete_policy(&self, tenant_id: &str, name: &str) -> BucketResult<()> {
        self.update_descriptor(tenant_id, name, |descriptor| {
            descriptor.policy = None;
            Ok(())
        })
        .await
    }

    /// Evaluate an access request against the bucket's policy.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::BucketNotFound`] if the bucket does not
    /// exist; an absent policy yields [`Decision::Deny`].
    pub async fn evaluate_policy(
        &self,
        tenant_id: &str,
        name: &str,
        request: &AccessRequest<'_>,
    ) -> BucketResult<Decision> {
        let descriptor = self.load_descriptor(tenant_id, name).await?;
        Ok(evaluate(descriptor.policy.as_ref(), request))
    }

    // -----------------------------------------------------------------------
    // Versioning / ACL
    // -----------------------------------------------------------------------

    /// Fetch the versioning state (default [`VersioningState::Disabled`]).
    pub async fn get_versioning(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> BucketResult<VersioningState> {
        Ok(self.load_descriptor(tenant_id, name).await?.versioning)
    }

    /// Set the versioning state.
    ///
    /// Versioning can be enabled and suspended but never returned to
    /// `Disabled` once it has been enabled.
    pub async fn set_versioning(
        &self,
        tenant_id: &str,
        name: &str,
        state: VersioningState,
    ) -> BucketResult<()> {
        self.update_descriptor(tenant_id, name, |descriptor| {
            if state == VersioningState::Disabled
                && descriptor.versioning != VersioningState::Disabled
            {
                return Err(BucketError::InvalidConfig {
                    message: "versioning cannot be disabled once enabled".to_owned(),
                });
            }
            descriptor.versioning = state;
            Ok(())
        })
        .await
    }

    /// Fetch the canned ACL.
    pub async fn get_acl(&self, tenant_id: &str, name: &str) -> BucketResult<CannedAcl> {
        Ok(self.load_descriptor(tenant_id, name).await?.acl)
    }

    /// Set the canned ACL.
    pub async fn set_acl(&self, tenant_id: &str, name: &str, acl: CannedAcl) -> BucketResult<()> {
        self.update_descriptor(tenant_id, name, |descriptor| {
            descriptor.acl = acl;
            Ok(())
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Lifecycle / CORS / tags / object lock
    // -----------------------------------------------------------------------

    /// Fetch the lifecycle configuration.
    ///
    /// # Errors
    ///
    /// [`BucketError::NoSuchLifecycle`] when none is configured.
    pub async fn get_lifecycle(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> BucketResult<Vec<LifecycleRule>> {
        let descriptor = self.load_descriptor(tenant_id, name).await?;
        descriptor
            .lifecycle
            .ok_or_else(|| BucketError::NoSuchLifecycle {
                bucket: name.to_owned(),
            })
    }

    /// Set the lifecycle configuration after validation.
    pub async fn set_lifecycle(
        &self,
        tenant_id: &str,
        name: &str,
        rules: Vec<LifecycleRule>,
    ) -> BucketResult<()> {
        validate_lifecycle(&rules)?;
        self.update_descriptor(tenant_id, name, |descriptor| {
            descriptor.lifecycle = Some(rules);
            Ok(())
        })
        .await
    }

    /// Remove the lifecycle configuration.
    pub async fn delete_lifecycle(&self, tenant_id: &str, name: &str) -> BucketResult<()> {
        self.update_descriptor(tenant_id, name, |descriptor| {
            descriptor.lifecycle = None;
            Ok(())
        })
        .await
    }

    /// Fetch the CORS configuration.
    ///
    /// # Errors
    ///
    /// [`BucketError::NoSuchCors`] when none is configured.
    pub async fn get_cors(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> BucketResult<Vec<CorsRuleConfig>> {
        let descriptor = self.load_descriptor(tenant_id, name).await?;
        descriptor.cors.ok_or_else(|| BucketError::NoSuchCors {
            bucket: name.to_owned(),
        })
    }

    /// Set the CORS configuration after validation.
    pub async fn set_cors(
        &self,
        tenant_id: &str,
        name: &str,
        rules: Vec<CorsRuleConfig>,
    ) -> BucketResult<()> {
        validate_cors(&rules)?;
        self.update_descriptor(tenant_id, name, |descriptor| {
            descriptor.cors = Some(rules);
            Ok(())
        })
        .await
    }

    /// Remove the CORS configuration.
    pub async fn delete_cors(&self, tenant_id: &str, name: &str) -> BucketResult<()> {
        self.update_descriptor(tenant_id, name, |descriptor| {
            descriptor.cors = None;
            Ok(())
        })
        .await
    }

    /// Fetch the tag set.
    ///
    /// # Errors
    ///
    /// [`BucketError::NoSuchTagSet`] when none is configured.
    pub async fn get_tags(&self, tenant_id: &str, name: &str) -> BucketResult<Vec<Tag>> {
        let descriptor = self.load_descriptor(tenant_id, name).await?;
        descriptor.tags.ok_or_else(|| BucketError::NoSuchTagSet {
            bucket: name.to_owned(),
        })
    }

    /// Set the tag set after validation.
    pub async fn set_tags(&self, tenant_id: &str, name: &str, tags: Vec<Tag>) -> BucketResult<()> {
        validate_tags(&tags)?;
        self.update_descriptor(tenant_id, name, |descriptor| {
            descriptor.tags = Some(tags);
            Ok(())
        })
        .await
    }

    /// Remove the tag set.
    pub async fn delete_tags(&self, tenant_id: &str, name: &str) -> BucketResult<()> {
        self.update_descriptor(tenant_id, name, |descriptor| {
            descriptor.tags = None;
            Ok(())
        })
        .await
    }

    /// Fetch the object-lock configuration.
    ///
    /// # Errors
    ///
    /// [`BucketError::ObjectLockNotFound`] when none is configured.
    pub async fn get_object_lock(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> BucketResult<ObjectLockConfig> {
        let descriptor = self.load_descriptor(tenant_id, name).await?;
        descriptor
            .object_lock
            .ok_or_else(|| BucketError::ObjectLockNotFound {
                bucket: name.to_owned(),
            })
    }

    /// Set the object-lock configuration after validation.
    ///
    /// Once `enabled = true` has been persisted it can never be reverted.
    pub async fn set_object_lock(
        &self,
        tenant_id: &str,
        name: &str,
        config: ObjectLockConfig,
    ) -> BucketResult<()> {
        config.validate()?;
        self.update_descriptor(tenant_id, name, |descriptor| {
            if descriptor.object_lock_enabled() && !config.enabled {
                return Err(BucketError::InvalidConfig {
                    message: "object lock cannot be disabled once enabled".to_owned(),
                });
            }
            descriptor.object_lock = Some(config);
            Ok(())
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Metrics
    // -----------------------------------------------------------------------

    /// Record one object written: `object_count += 1`,
    /// `total_size += size`.
    pub async fn increment_object_count(
        &self,
        tenant_id: &str,
        name: &str,
        size: u64,
    ) -> BucketResult<()> {
        let lock = self.metric_lock(tenant_id, name);
        let _guard = lock.lock().await;

        let mut descriptor = self.load_descriptor(tenant_id, name).await?;
        descriptor.metrics.object_count += 1;
        descriptor.metrics.total_size += size;
        self.store_descriptor(&descriptor).await?;
        Ok(())
    }

    /// Record one object removed. Counters saturate at zero.
    pub async fn decrement_object_count(
        &self,
        tenant_id: &str,
        name: &str,
        size: u64,
    ) -> BucketResult<()> {
        let lock = self.metric_lock(tenant_id, name);
        let _guard = lock.lock().await;

        let mut descriptor = self.load_descriptor(tenant_id, name).await?;
        descriptor.metrics.object_count = descriptor.metrics.object_count.saturating_sub(1);
        descriptor.metrics.total_size = descriptor.metrics.total_size.saturating_sub(size);
        self.store_descriptor(&descriptor).await?;
        Ok(())
    }

    /// Rebuild the cached metrics from the object records.
    ///
    /// Runs under the same per-bucket mutex as the delta updates, so no
    /// in-flight delta can be lost to the rebuild.
    pub async fn recalculate_metrics(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> BucketResult<BucketMetrics> {
        let lock = self.metric_lock(tenant_id, name);
        let _guard = lock.lock().await;

        let mut metrics = BucketMetrics::default();
        for record in self.scan_object_records(tenant_id, name).await? {
            if record.is_delete_marker() {
                continue;
            }
            metrics.object_count += 1;
            metrics.total_size += record.size;
        }

        let mut descriptor = self.load_descriptor(tenant_id, name).await?;
        if descriptor.metrics != metrics {
            debug!(
                tenant_id,
                bucket = name,
                old = ?descriptor.metrics,
                new = ?metrics,
                "metrics drift corrected"
            );
        }
        descriptor.metrics = metrics;
        self.store_descriptor(&descriptor).await?;
        Ok(metrics)
    }

    // -----------------------------------------------------------------------
    // Object records
    // -----------------------------------------------------------------------

    /// Store a per-object metadata record.
    pub async fn put_object_record(
        &self,
        tenant_id: &str,
        name: &str,
        record: &ObjectRecord,
    ) -> BucketResult<()> {
        self.load_descriptor(tenant_id, name).await?;
        put_json(
            self.metadata.as_ref(),
            &types::object_record_key(tenant_id, name, &record.key),
            record,
        )
        .await?;
        Ok(())
    }

    /// Fetch a per-object metadata record.
    ///
    /// # Errors
    ///
    /// [`BucketError::Core`] with [`CoreError::NotFound`] when the record
    /// does not exist.
    pub async fn get_object_record(
        &self,
        tenant_id: &str,
        name: &str,
        key: &str,
    ) -> BucketResult<ObjectRecord> {
        Ok(get_json(
            self.metadata.as_ref(),
            &types::object_record_key(tenant_id, name, key),
        )
        .await?)
    }

    /// Remove a per-object metadata record.
    pub async fn delete_object_record(
        &self,
        tenant_id: &str,
        name: &str,
        key: &str,
    ) -> BucketResult<()> {
        self.metadata
            .delete(&types::object_record_key(tenant_id, name, key))
            .await?;
        Ok(())
    }

    /// Read an object's payload, for callers that hold a bucket reference.
    pub async fn read_object(
        &self,
        tenant_id: &str,
        name: &str,
        key: &str,
    ) -> BucketResult<StoredObject> {
        Ok(self
            .objects
            .get_object(&types::physical_key(tenant_id, name, key))
            .await?)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Per-bucket metric mutex, created lazily and never removed.
    fn metric_lock(&self, tenant_id: &str, name: &str) -> Arc<Mutex<()>> {
        self.metric_locks
            .entry((tenant_id.to_owned(), name.to_owned()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load_descriptor(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> BucketResult<BucketDescriptor> {
        get_json(self.metadata.as_ref(), &types::bucket_key(tenant_id, name))
            .await
            .map_err(|err| match err {
                CoreError::NotFound { .. } => BucketError::BucketNotFound {
                    bucket: name.to_owned(),
                },
                other => BucketError::Core(other),
            })
    }

    async fn store_descriptor(&self, descriptor: &BucketDescriptor) -> BucketResult<()> {
        put_json(
            self.metadata.as_ref(),
            &types::bucket_key(&descriptor.tenant_id, &descriptor.name),
            descriptor,
        )
        .await?;
        Ok(())
    }

    /// Load-mutate-store a descriptor, surfacing validation failures before
    /// anything is persisted.
    async fn update_descriptor<F>(&self, tenant_id: &str, name: &str, apply: F) -> BucketResult<()>
    where
        F: FnOnce(&mut BucketDescriptor) -> BucketResult<()>,
    {
        let mut descriptor = self.load_descriptor(tenant_id, name).await?;
        apply(&mut descriptor)?;
        self.store_descriptor(&descriptor).await
    }

    async fn scan_object_records(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> BucketResult<Vec<ObjectRecord>> {
        let prefix = types::object_record_prefix(tenant_id, name);
        let keys = self.metadata.list_keys(&prefix).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            records.push(get_json(self.metadata.as_ref(), &key).await?);
        }
        Ok(records)
    }

    /// The emptiness protocol. Returns `true` when the bucket is logically
    /// empty after orphan cleanup.
    async fn ensure_empty(&self, tenant_id: &str, name: &str) -> BucketResult<bool> {
        let prefix = types::physical_prefix(tenant_id, name);
        let entries = self.objects.list_objects(&prefix, usize::MAX).await?;

        for entry in entries {
            let Some(relative) = entry.key.strip_prefix(&prefix) else {
                continue;
            };
            if types::is_internal_file(relative) {
                continue;
            }

            let record_key = types::object_record_key(tenant_id, name, relative);
            let record = match self.metadata.get(&record_key).await {
                Ok(Some(bytes)) => match serde_json::from_slice::<ObjectRecord>(&bytes) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        // Fail closed: an unreadable record may be a live object.
                        warn!(key = %record_key, error = %err, "unreadable object record");
                        return Ok(false);
                    }
                },
                Ok(None) => None,
                Err(err) => {
                    warn!(key = %record_key, error = %err, "record lookup failed");
                    return Ok(false);
                }
            };

            match record {
                None => {
                    debug!(key = %entry.key, "removing orphaned physical file");
                    if let Err(err) = self.objects.delete_object(&entry.key).await {
                        warn!(key = %entry.key, error = %err, "orphan cleanup failed");
                    }
                }
                Some(record) if record.is_delete_marker() => {
                    debug!(key = %entry.key, "removing payload behind delete marker");
                    if let Err(err) = self.objects.delete_object(&entry.key).await {
                        warn!(key = %entry.key, error = %err, "orphan cleanup failed");
                    }
                }
                Some(_) => return Ok(false),
            }
        }

        Ok(true)
    }

    /// Remove everything that defines the bucket: internal files, object
    /// records, the descriptor, and the cluster-wide name claim.
    async fn remove_bucket_remnants(&self, tenant_id: &str, name: &str) -> BucketResult<()> {
        let prefix = types::physical_prefix(tenant_id, name);
        for entry in self.objects.list_objects(&prefix, usize::MAX).await? {
            self.objects.delete_object(&entry.key).await?;
        }

        let record_prefix = types::object_record_prefix(tenant_id, name);
        for key in self.metadata.list_keys(&record_prefix).await? {
            self.metadata.delete(&key).await?;
        }

        self.metadata
            .delete(&types::bucket_key(tenant_id, name))
            .await?;
        self.metadata.delete(&global_name_key(name)).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
