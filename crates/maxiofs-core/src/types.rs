//! Shared record types and the key layout contract.
//!
//! Two namespaces exist side by side:
//!
//! - **KV keys** address the metadata store: `bucket:<tenant>:<name>` for
//!   bucket descriptors and `object:<tenant>:<bucket>:<key>` for per-object
//!   records.
//! - **Physical keys** address the payload backend: `<tenant>/<bucket>/<key>`.
//!
//! Every component that touches either store goes through the helpers in
//! this module so the layout is defined exactly once.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Zero-byte marker file proving a bucket's physical presence.
pub const BUCKET_MARKER_FILE: &str = ".maxiofs-bucket";

/// Prefix of internal bookkeeping files that never count as bucket content.
pub const INTERNAL_FILE_PREFIX: &str = ".maxiofs-";

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

/// Kind of principal that owns a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    /// Owned by an individual user.
    User,
    /// Owned by the tenant itself.
    Tenant,
}

/// Bucket owner: a user or the tenant itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    /// Whether the owner is a user or the tenant.
    pub owner_type: OwnerType,
    /// Identifier of the owning principal.
    pub id: String,
}

impl Owner {
    /// Resolve the effective owner for a bucket.
    ///
    /// An explicit `owner_id` yields a user owner; otherwise the tenant
    /// itself owns the bucket.
    #[must_use]
    pub fn resolve(tenant_id: &str, owner_id: Option<&str>) -> Self {
        match owner_id {
            Some(id) => Self {
                owner_type: OwnerType::User,
                id: id.to_owned(),
            },
            None => Self {
                owner_type: OwnerType::Tenant,
                id: tenant_id.to_owned(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Object records
// ---------------------------------------------------------------------------

/// Per-object metadata record, JSON-encoded in the metadata store under
/// `object:<tenant>:<bucket>:<key>`.
///
/// A record with an empty ETag and zero size is a *delete marker*: the
/// object is logically deleted even if a stale payload still exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    /// Object key within the bucket.
    pub key: String,
    /// Unquoted hex MD5 of the payload; empty for delete markers.
    pub etag: String,
    /// Payload size in bytes.
    pub size: u64,
    /// MIME type, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// User-defined metadata forwarded on replication.
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Version identifier when versioning is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Object-lock retention deadline; the object cannot be removed before
    /// this instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain_until: Option<DateTime<Utc>>,
}

impl ObjectRecord {
    /// Build a live record for a freshly-written payload.
    #[must_use]
    pub fn live(key: &str, etag: &str, size: u64) -> Self {
        Self {
            key: key.to_owned(),
            etag: etag.to_owned(),
            size,
            content_type: None,
            user_metadata: HashMap::new(),
            last_modified: Utc::now(),
            version_id: None,
            retain_until: None,
        }
    }

    /// Build a delete marker for a logically-removed object.
    #[must_use]
    pub fn delete_marker(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            etag: String::new(),
            size: 0,
            content_type: None,
            user_metadata: HashMap::new(),
            last_modified: Utc::now(),
            version_id: None,
            retain_until: None,
        }
    }

    /// Whether this record marks a logical deletion (empty ETag, zero size).
    #[must_use]
    pub fn is_delete_marker(&self) -> bool {
        self.etag.is_empty() && self.size == 0
    }

    /// Whether object-lock retention still protects this object at `now`.
    #[must_use]
    pub fn is_retained_at(&self, now: DateTime<Utc>) -> bool {
        self.retain_until.is_some_and(|until| until > now)
    }
}

// ---------------------------------------------------------------------------
// Store I/O summaries
// ---------------------------------------------------------------------------

/// Result of writing a payload to the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    /// Unquoted hex MD5 of the written data.
    pub etag: String,
    /// Size in bytes.
    pub size: u64,
}

/// A payload read back from the object store, with its stored attributes.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// The raw payload bytes.
    pub data: Bytes,
    /// MIME type recorded at write time, if any.
    pub content_type: Option<String>,
    /// User-defined metadata recorded at write time.
    pub user_metadata: HashMap<String, String>,
}

/// Size and attributes of a stored payload without its data.
#[derive(Debug, Clone)]
pub struct ObjectStat {
    /// Size in bytes.
    pub size: u64,
    /// MIME type recorded at write time, if any.
    pub content_type: Option<String>,
    /// User-defined metadata recorded at write time.
    pub user_metadata: HashMap<String, String>,
}

/// One entry of an object-store listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Full physical key.
    pub key: String,
    /// Payload size in bytes.
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

/// KV key of a bucket descriptor.
#[must_use]
pub fn bucket_key(tenant_id: &str, bucket: &str) -> String {
    format!("bucket:{tenant_id}:{bucket}")
}

/// KV key prefix of all bucket descriptors of a tenant.
#[must_use]
pub fn bucket_prefix(tenant_id: &str) -> String {
    format!("bucket:{tenant_id}:")
}

/// KV key of a per-object record.
#[must_use]
pub fn object_record_key(tenant_id: &str, bucket: &str, key: &str) -> String {
    format!("object:{tenant_id}:{bucket}:{key}")
}

/// KV key prefix of all object records in a bucket.
#[must_use]
pub fn object_record_prefix(tenant_id: &str, bucket: &str) -> String {
    format!("object:{tenant_id}:{bucket}:")
}

/// Physical key of a payload in the object store.
#[must_use]
pub fn physical_key(tenant_id: &str, bucket: &str, key: &str) -> String {
    format!("{tenant_id}/{bucket}/{key}")
}

/// Physical key prefix of all payloads in a bucket.
#[must_use]
pub fn physical_prefix(tenant_id: &str, bucket: &str) -> String {
    format!("{tenant_id}/{bucket}/")
}

/// Whether a physical file name (relative to the bucket prefix) is internal
/// bookkeeping rather than bucket content.
#[must_use]
pub fn is_internal_file(name: &str) -> bool {
    name.starts_with(INTERNAL_FILE_PREFIX)
}
