//! The object payload backend contract and its in-memory implementation.
//!
//! Payloads are addressed by flat physical keys (`<tenant>/<bucket>/<key>`,
//! see [`crate::types::physical_key`]). The backend knows nothing about
//! buckets or tenants; higher layers own the key layout.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use md5::{Digest, Md5};
use tracing::trace;

use crate::error::{CoreError, CoreResult};
use crate::types::{ObjectStat, ObjectSummary, StoredObject, WriteSummary};

/// Compute the unquoted hex MD5 digest used as an ETag.
#[must_use]
pub fn compute_etag(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Object payload backend.
///
/// Implementations must be safe for concurrent use. Writes replace any
/// existing payload under the same key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a payload with optional content type and user metadata.
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        user_metadata: &HashMap<String, String>,
    ) -> CoreResult<WriteSummary>;

    /// Read a payload back with its stored attributes.
    async fn get_object(&self, key: &str) -> CoreResult<StoredObject>;

    /// Fetch a payload's attributes without its data.
    async fn head_object(&self, key: &str) -> CoreResult<ObjectStat>;

    /// Remove a payload. Removing a missing key is a no-op.
    async fn delete_object(&self, key: &str) -> CoreResult<()>;

    /// List up to `max_keys` payloads whose key starts with `prefix`,
    /// sorted by key.
    async fn list_objects(&self, prefix: &str, max_keys: usize) -> CoreResult<Vec<ObjectSummary>>;
}

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

/// One stored payload with its attributes.
struct StoredEntry {
    data: Bytes,
    content_type: Option<String>,
    user_metadata: HashMap<String, String>,
}

/// In-memory payload backend backed by a [`DashMap`].
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use bytes::Bytes;
/// use maxiofs_core::object_store::{MemoryObjectStore, ObjectStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryObjectStore::new();
/// let summary = store
///     .put_object("t1/b/hello.txt", Bytes::from("hello"), None, &HashMap::new())
///     .await
///     .unwrap();
/// assert_eq!(summary.size, 5);
/// # });
/// ```
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, StoredEntry>,
}

impl std::fmt::Debug for MemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObjectStore")
            .field("object_count", &self.objects.len())
            .finish()
    }
}

impl MemoryObjectStore {
    /// Create a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no payloads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        user_metadata: &HashMap<String, String>,
    ) -> CoreResult<WriteSummary> {
        let etag = compute_etag(&data);
        let size = data.len() as u64;

        trace!(key, size, "stored payload");
        self.objects.insert(
            key.to_owned(),
            StoredEntry {
                data,
                content_type: content_type.map(ToOwned::to_owned),
                user_metadata: user_metadata.clone(),
            },
        );

        Ok(WriteSummary { etag, size })
    }

    async fn get_object(&self, key: &str) -> CoreResult<StoredObject> {
        let entry = self.objects.get(key).ok_or_else(|| CoreError::NotFound {
            key: key.to_owned(),
        })?;
        Ok(StoredObject {
            data: entry.data.clone(),
            content_type: entry.content_type.clone(),
            user_metadata: entry.user_metadata.clone(),
        })
    }

    async fn head_object(&self, key: &str) -> CoreResult<ObjectStat> {
        let entry = self.objects.get(key).ok_or_else(|| CoreError::NotFound {
            key: key.to_owned(),
        })?;
        Ok(ObjectStat {
            size: entry.data.len() as u64,
            content_type: entry.content_type.clone(),
            user_metadata: entry.user_metadata.clone(),
        })
    }

    async fn delete_object(&self, key: &str) -> CoreResult<()> {
        if self.objects.remove(key).is_some() {
            trace!(key, "deleted payload");
        }
        Ok(())
    }

    async fn list_objects(&self, prefix: &str, max_keys: usize) -> CoreResult<Vec<ObjectSummary>> {
        let mut entries: Vec<ObjectSummary> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| ObjectSummary {
                key: entry.key().clone(),
                size: entry.value().data.len() as u64,
            })
            .collect();
        entries.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        entries.truncate(max_keys);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[tokio::test]
    async fn test_should_write_and_read_payload() {
        let store = MemoryObjectStore::new();
        let data = Bytes::from("hello world");
        let summary = store
            .put_object("t1/b/k.txt", data.clone(), Some("text/plain"), &meta(&[]))
            .await
            .unwrap_or_else(|e| panic!("put failed: {e}"));

        assert_eq!(summary.size, 11);
        assert_eq!(summary.etag, compute_etag(b"hello world"));

        let stored = store
            .get_object("t1/b/k.txt")
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(stored.data, data);
        assert_eq!(stored.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_should_preserve_user_metadata() {
        let store = MemoryObjectStore::new();
        let user_meta = meta(&[("bucket-created", "2026-01-01T00:00:00Z")]);
        store
            .put_object("t1/b/.maxiofs-bucket", Bytes::new(), None, &user_meta)
            .await
            .unwrap_or_else(|e| panic!("put failed: {e}"));

        let stat = store
            .head_object("t1/b/.maxiofs-bucket")
            .await
            .unwrap_or_else(|e| panic!("head failed: {e}"));
        assert_eq!(stat.size, 0);
        assert_eq!(
            stat.user_metadata.get("bucket-created").map(String::as_str),
            Some("2026-01-01T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn test_should_return_not_found_for_missing_payload() {
        let store = MemoryObjectStore::new();
        assert!(matches!(
            store.get_object("ghost").await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.head_object("ghost").await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_delete_payload() {
        let store = MemoryObjectStore::new();
        store
            .put_object("t1/b/k", Bytes::from("x"), None, &meta(&[]))
            .await
            .unwrap_or_else(|e| panic!("put failed: {e}"));
        store
            .delete_object("t1/b/k")
            .await
            .unwrap_or_else(|e| panic!("delete failed: {e}"));
        assert!(store.is_empty());

        // Deleting again is a no-op.
        store
            .delete_object("t1/b/k")
            .await
            .unwrap_or_else(|e| panic!("second delete failed: {e}"));
    }

    #[tokio::test]
    async fn test_should_list_by_prefix_sorted_and_capped() {
        let store = MemoryObjectStore::new();
        for key in ["t1/b/c.txt", "t1/b/a.txt", "t1/b/b.txt", "t1/other/x"] {
            store
                .put_object(key, Bytes::from("data"), None, &meta(&[]))
                .await
                .unwrap_or_else(|e| panic!("put {key} failed: {e}"));
        }

        let all = store
            .list_objects("t1/b/", 100)
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        let keys: Vec<&str> = all.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["t1/b/a.txt", "t1/b/b.txt", "t1/b/c.txt"]);

        let capped = store
            .list_objects("t1/b/", 2)
            .await
            .unwrap_or_else(|e| panic!("capped list failed: {e}"));
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].key, "t1/b/a.txt");
    }

    #[tokio::test]
    async fn test_should_overwrite_payload_under_same_key() {
        let store = MemoryObjectStore::new();
        store
            .put_object("k", Bytes::from("one"), None, &meta(&[]))
            .await
            .unwrap_or_else(|e| panic!("put failed: {e}"));
        store
            .put_object("k", Bytes::from("two"), None, &meta(&[]))
            .await
            .unwrap_or_else(|e| panic!("overwrite failed: {e}"));

        let stored = store
            .get_object("k")
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(stored.data.as_ref(), b"two");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_should_compute_known_etag() {
        // MD5("hello") from the RFC 1321 test suite neighborhood.
        assert_eq!(compute_etag(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }
}
