//! The replication engine's read-side view of local data.
//!
//! [`ObjectSource`] narrows the two stores down to the two operations
//! replication needs: reading one object's bytes (with the metadata that is
//! forwarded to the destination) and listing a bucket's live keys.
//! [`StoreObjectSource`] is the production adapter over a
//! [`MetadataStore`] + [`ObjectStore`] pair; tests may substitute their own
//! implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::metadata::{MetadataStore, get_json};
use crate::object_store::ObjectStore;
use crate::types::{self, ObjectRecord, StoredObject};

/// Local object read and bucket listing, as seen by replication.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Read one object's payload and stored attributes.
    async fn read(&self, tenant_id: &str, bucket: &str, key: &str) -> CoreResult<StoredObject>;

    /// List up to `max_keys` live object keys in a bucket, filtered by
    /// `prefix` (empty prefix matches everything), sorted ascending.
    async fn list(
        &self,
        tenant_id: &str,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> CoreResult<Vec<String>>;
}

/// [`ObjectSource`] over the metadata and payload stores.
///
/// Listing is driven by object *records*, so delete markers and internal
/// files never surface; reads go to the payload store after confirming a
/// live record exists.
pub struct StoreObjectSource {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for StoreObjectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreObjectSource").finish()
    }
}

impl StoreObjectSource {
    /// Create an adapter over the given stores.
    #[must_use]
    pub fn new(metadata: Arc<dyn MetadataStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { metadata, objects }
    }
}

#[async_trait]
impl ObjectSource for StoreObjectSource {
    async fn read(&self, tenant_id: &str, bucket: &str, key: &str) -> CoreResult<StoredObject> {
        let record_key = types::object_record_key(tenant_id, bucket, key);
        let record: ObjectRecord = get_json(self.metadata.as_ref(), &record_key).await?;
        if record.is_delete_marker() {
            return Err(CoreError::NotFound { key: record_key });
        }

        let physical = types::physical_key(tenant_id, bucket, key);
        let mut stored = self.objects.get_object(&physical).await?;

        // The record is authoritative for forwarded attributes.
        if stored.content_type.is_none() {
            stored.content_type = record.content_type;
        }
        if stored.user_metadata.is_empty() {
            stored.user_metadata = record.user_metadata;
        }
        Ok(stored)
    }

    async fn list(
        &self,
        tenant_id: &str,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> CoreResult<Vec<String>> {
        let record_prefix = types::object_record_prefix(tenant_id, bucket);
        let record_keys = self.metadata.list_keys(&record_prefix).await?;

        let mut keys = Vec::new();
        for record_key in record_keys {
            if keys.len() >= max_keys {
                break;
            }
            let Some(object_key) = record_key.strip_prefix(&record_prefix) else {
                continue;
            };
            if !prefix.is_empty() && !object_key.starts_with(prefix) {
                continue;
            }
            let record: ObjectRecord = get_json(self.metadata.as_ref(), &record_key).await?;
            if record.is_delete_marker() {
                continue;
            }
            keys.push(object_key.to_owned());
        }

        debug!(
            tenant_id,
            bucket,
            prefix,
            count = keys.len(),
            "listed source objects"
        );
        Ok(keys)
    }
}
