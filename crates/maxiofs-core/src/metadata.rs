//! The key-value metadata store contract and its in-memory implementation.
//!
//! The metadata store is the authoritative home of bucket descriptors and
//! per-object records (see [`crate::types`] for the key layout). Values are
//! opaque bytes at this level; callers encode JSON via [`get_json`] /
//! [`put_json`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{CoreError, CoreResult};

/// Key-value metadata store.
///
/// Implementations must be safe for concurrent use; each call is an
/// independent atomic operation.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> CoreResult<()>;

    /// Remove the value stored under `key`. Removing a missing key is a
    /// no-op.
    async fn delete(&self, key: &str) -> CoreResult<()>;

    /// List all keys starting with `prefix`, sorted ascending.
    async fn list_keys(&self, prefix: &str) -> CoreResult<Vec<String>>;
}

/// Fetch and JSON-decode the value under `key`.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if the key is absent, or
/// [`CoreError::Serialization`] if the stored bytes are not valid JSON for
/// `T`.
pub async fn get_json<T: DeserializeOwned>(store: &dyn MetadataStore, key: &str) -> CoreResult<T> {
    let bytes = store.get(key).await?.ok_or_else(|| CoreError::NotFound {
        key: key.to_owned(),
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// JSON-encode `value` and store it under `key`.
///
/// # Errors
///
/// Returns [`CoreError::Serialization`] if encoding fails, or any error of
/// the underlying store.
pub async fn put_json<T: Serialize>(
    store: &dyn MetadataStore,
    key: &str,
    value: &T,
) -> CoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.put(key, bytes).await
}

// ---------------------------------------------------------------------------
// MemoryMetadataStore
// ---------------------------------------------------------------------------

/// In-memory metadata store backed by a [`DashMap`].
///
/// Used by tests and single-node deployments. All operations are lock-free
/// per entry.
#[derive(Default)]
pub struct MemoryMetadataStore {
    entries: DashMap<String, Vec<u8>>,
}

impl std::fmt::Debug for MemoryMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMetadataStore")
            .field("entry_count", &self.entries.len())
            .finish()
    }
}

impl MemoryMetadataStore {
    /// Create a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> CoreResult<()> {
        trace!(key, size = value.len(), "metadata put");
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        if self.entries.remove(key).is_some() {
            trace!(key, "metadata delete");
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> CoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }
}
