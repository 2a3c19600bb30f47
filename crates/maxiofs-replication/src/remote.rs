//! Remote S3 clients for the replication path.
//!
//! The worker never talks to a concrete client type: it receives a
//! [`RemoteClientFactory`] and builds a fresh client per processed row from
//! the rule's endpoint and static credentials. Production uses
//! [`S3RemoteClient`] (plain S3 wire protocol, path-style URLs, no
//! MaxIOFS-specific headers, so any S3-compatible endpoint works); tests
//! substitute [`MemoryRemoteClient`] writing into a shared
//! [`MemoryRemoteStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::{ReplicationError, ReplicationResult};
use crate::rule::ReplicationRule;

/// S3 operations the replication worker needs against a destination.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Upload a payload; returns the number of bytes shipped.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> ReplicationResult<u64>;

    /// Download a payload.
    async fn get_object(&self, bucket: &str, key: &str) -> ReplicationResult<Bytes>;

    /// Probe a key; returns its size, or `None` if absent.
    async fn head_object(&self, bucket: &str, key: &str) -> ReplicationResult<Option<u64>>;

    /// Delete a key. Deleting an absent key succeeds (S3 semantics).
    async fn delete_object(&self, bucket: &str, key: &str) -> ReplicationResult<()>;

    /// Server-side copy within the destination.
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
    ) -> ReplicationResult<()>;

    /// List up to `max_keys` keys under `prefix`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> ReplicationResult<Vec<String>>;

    /// Verify the destination is reachable and the bucket exists.
    async fn test_connection(&self, bucket: &str) -> ReplicationResult<()>;
}

/// Builds a remote client for a rule. Injectable so tests can redirect
/// replication into an in-memory destination.
pub trait RemoteClientFactory: Send + Sync {
    /// Construct a client for the rule's destination.
    fn client_for(&self, rule: &ReplicationRule) -> ReplicationResult<Arc<dyn RemoteClient>>;
}

// ---------------------------------------------------------------------------
// S3RemoteClient
// ---------------------------------------------------------------------------

/// Real S3 client over `aws-sdk-s3` with static credentials and path-style
/// addressing.
pub struct S3RemoteClient {
    client: aws_sdk_s3::Client,
}

impl std::fmt::Debug for S3RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3RemoteClient").finish()
    }
}

impl S3RemoteClient {
    /// Build a client for one destination endpoint.
    #[must_use]
    pub fn new(endpoint: &str, region: &str, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "replication-rule");

        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new(region.to_owned()))
            .credentials_provider(credentials)
            // Bucket in the path, not the host: required for arbitrary
            // S3-compatible endpoints.
            .force_path_style(true)
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(config),
        }
    }
}

/// Map any SDK failure to a retriable transport error.
fn remote_err(err: impl std::fmt::Display) -> ReplicationError {
    ReplicationError::remote(err.to_string())
}

#[async_trait]
impl RemoteClient for S3RemoteClient {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> ReplicationResult<u64> {
        let size = data.len() as u64;
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data));
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        if !metadata.is_empty() {
            request = request.set_metadata(Some(metadata.clone()));
        }

        request.send().await.map_err(remote_err)?;
        debug!(bucket, key, size, "remote put");
        Ok(size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ReplicationResult<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(remote_err)?;
        let body = response.body.collect().await.map_err(remote_err)?;
        Ok(body.into_bytes())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ReplicationResult<Option<u64>> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => Ok(response.content_length().map(|len| len.unsigned_abs())),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => Err(remote_err(err)),
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ReplicationResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(remote_err)?;
        debug!(bucket, key, "remote delete");
        Ok(())
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
    ) -> ReplicationResult<()> {
        self.client
            .copy_object()
            .copy_source(format!("{source_bucket}/{source_key}"))
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(remote_err)?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> ReplicationResult<Vec<String>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(i32::try_from(max_keys).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(remote_err)?;

        Ok(response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(ToOwned::to_owned))
            .collect())
    }

    async fn test_connection(&self, bucket: &str) -> ReplicationResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(remote_err)?;
        Ok(())
    }
}

/// Production factory: one [`S3RemoteClient`] per rule, built from the
/// rule's endpoint, effective region, and static credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct S3RemoteClientFactory;

impl RemoteClientFactory for S3RemoteClientFactory {
    fn client_for(&self, rule: &ReplicationRule) -> ReplicationResult<Arc<dyn RemoteClient>> {
        Ok(Arc::new(S3RemoteClient::new(
            &rule.destination_endpoint,
            rule.effective_region(),
            &rule.destination_access_key,
            &rule.destination_secret_key,
        )))
    }
}

// ---------------------------------------------------------------------------
// In-memory destination
// ---------------------------------------------------------------------------

/// One object held by the in-memory destination.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    /// Payload bytes.
    pub data: Bytes,
    /// Content type forwarded on the put.
    pub content_type: Option<String>,
    /// User metadata forwarded on the put.
    pub metadata: HashMap<String, String>,
}

/// Shared in-memory destination for tests: a `DashMap` of
/// `(bucket, key) -> object` plus transient-failure injection.
#[derive(Default)]
pub struct MemoryRemoteStore {
    objects: DashMap<(String, String), RemoteObject>,
    put_failures: AtomicUsize,
    put_calls: AtomicUsize,
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemoteStore")
            .field("object_count", &self.objects.len())
            .finish_non_exhaustive()
    }
}

impl MemoryRemoteStore {
    /// Create an empty destination.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` put calls fail with a transport error.
    pub fn fail_puts(&self, count: usize) {
        self.put_failures.store(count, Ordering::SeqCst);
    }

    /// Total put calls observed, including injected failures.
    #[must_use]
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Fetch one stored object.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<RemoteObject> {
        self.objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|entry| entry.value().clone())
    }

    /// Number of stored objects across all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no objects are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Consume one injected failure, if any remain.
    fn take_failure(&self) -> bool {
        self.put_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// [`RemoteClient`] writing into a [`MemoryRemoteStore`].
#[derive(Debug, Clone)]
pub struct MemoryRemoteClient {
    store: Arc<MemoryRemoteStore>,
}

impl MemoryRemoteClient {
    /// Create a client over the shared store.
    #[must_use]
    pub fn new(store: Arc<MemoryRemoteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RemoteClient for MemoryRemoteClient {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> ReplicationResult<u64> {
        self.store.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.store.take_failure() {
            return Err(ReplicationError::remote("injected put failure"));
        }

        let size = data.len() as u64;
        trace!(bucket, key, size, "memory remote put");
        self.store.objects.insert(
            (bucket.to_owned(), key.to_owned()),
            RemoteObject {
                data,
                content_type: content_type.map(ToOwned::to_owned),
                metadata: metadata.clone(),
            },
        );
        Ok(size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ReplicationResult<Bytes> {
        self.store
            .object(bucket, key)
            .map(|object| object.data)
            .ok_or_else(|| ReplicationError::remote(format!("no such key: {bucket}/{key}")))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ReplicationResult<Option<u64>> {
        Ok(self
            .store
            .object(bucket, key)
            .map(|object| object.data.len() as u64))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ReplicationResult<()> {
        self.store
            .objects
            .remove(&(bucket.to_owned(), key.to_owned()));
        Ok(())
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
    ) -> ReplicationResult<()> {
        let object = self
            .store
            .object(source_bucket, source_key)
            .ok_or_else(|| {
                ReplicationError::remote(format!("no such key: {source_bucket}/{source_key}"))
            })?;
        self.store
            .objects
            .insert((bucket.to_owned(), key.to_owned()), object);
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> ReplicationResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket && entry.key().1.starts_with(prefix))
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort_unstable();
        keys.truncate(max_keys);
        Ok(keys)
    }

    async fn test_connection(&self, _bucket: &str) -> ReplicationResult<()> {
        Ok(())
    }
}

/// Test factory: every rule maps onto the same shared in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryRemoteClientFactory {
    store: Arc<MemoryRemoteStore>,
}

impl MemoryRemoteClientFactory {
    /// Create a factory over the shared store.
    #[must_use]
    pub fn new(store: Arc<MemoryRemoteStore>) -> Self {
        Self { store }
    }
}

impl RemoteClientFactory for MemoryRemoteClientFactory {
    fn client_for(&self, _rule: &ReplicationRule) -> ReplicationResult<Arc<dyn RemoteClient>> {
        Ok(Arc::new(MemoryRemoteClient::new(self.store.clone())))
    }
}
