//! Bucket descriptors and configuration subresource types.
//!
//! The descriptor is the authoritative bucket record, JSON-encoded in the
//! metadata store under `bucket:<tenant>:<name>`. Subresources are plain
//! serde data validated at set-time; nothing is persisted unvalidated.

use chrono::{DateTime, Utc};
use maxiofs_policy::PolicyDocument;
use serde::{Deserialize, Serialize};

use maxiofs_core::Owner;

use crate::error::BucketError;

/// Maximum number of tags on a bucket.
const MAX_TAGS: usize = 50;

/// Maximum length of a tag key in characters.
const MAX_TAG_KEY_LEN: usize = 128;

/// Maximum length of a tag value in characters.
const MAX_TAG_VALUE_LEN: usize = 256;

// ---------------------------------------------------------------------------
// Subresource types
// ---------------------------------------------------------------------------

/// Bucket versioning state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningState {
    /// Versioning has never been enabled on this bucket.
    #[default]
    Disabled,
    /// Versioning is currently enabled.
    Enabled,
    /// Versioning was previously enabled but is now suspended.
    Suspended,
}

/// Canned ACL applied to the bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CannedAcl {
    /// Owner-only access.
    #[default]
    Private,
    /// Anyone may read.
    PublicRead,
    /// Anyone may read and write.
    PublicReadWrite,
    /// Authenticated users may read.
    AuthenticatedRead,
}

/// Object-lock retention mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectLockMode {
    /// Retention can be shortened by privileged users.
    Governance,
    /// Retention cannot be shortened by anyone.
    Compliance,
}

/// Default retention rule within an object-lock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectLockRule {
    /// The retention mode.
    pub mode: ObjectLockMode,
    /// Retention period in days.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    /// Retention period in years.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub years: Option<u32>,
}

/// Object-lock configuration for a bucket.
///
/// Once persisted with `enabled = true`, the flag can never be turned back
/// off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectLockConfig {
    /// Whether object lock is enabled.
    pub enabled: bool,
    /// Optional default retention rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<ObjectLockRule>,
}

impl ObjectLockConfig {
    /// Validate the configuration.
    ///
    /// A rule must set exactly one of `days` or `years`, and the value must
    /// be positive.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::InvalidConfig`] on violation.
    pub fn validate(&self) -> Result<(), BucketError> {
        let Some(rule) = self.rule else {
            return Ok(());
        };
        match (rule.days, rule.years) {
            (Some(days), None) if days > 0 => Ok(()),
            (None, Some(years)) if years > 0 => Ok(()),
            (Some(_), Some(_)) => Err(BucketError::InvalidConfig {
                message: "object-lock rule must set days or years, not both".to_owned(),
            }),
            _ => Err(BucketError::InvalidConfig {
                message: "object-lock rule must set a positive days or years period".to_owned(),
            }),
        }
    }
}

/// One CORS rule stored on a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsRuleConfig {
    /// Optional identifier for the rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Origins allowed to make cross-domain requests.
    pub allowed_origins: Vec<String>,
    /// HTTP methods the origin may execute.
    pub allowed_methods: Vec<String>,
    /// Headers allowed in a pre-flight request.
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// Response headers exposed to the browser.
    #[serde(default)]
    pub expose_headers: Vec<String>,
    /// Preflight cache lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<i32>,
}

/// Validate a CORS rule set.
///
/// # Errors
///
/// Returns [`BucketError::InvalidConfig`] when the set is empty, or a rule
/// has no origins or methods.
pub fn validate_cors(rules: &[CorsRuleConfig]) -> Result<(), BucketError> {
    if rules.is_empty() {
        return Err(BucketError::InvalidConfig {
            message: "CORS configuration must contain at least one rule".to_owned(),
        });
    }
    for rule in rules {
        if rule.allowed_origins.is_empty() {
            return Err(BucketError::InvalidConfig {
                message: "CORS rule must name at least one allowed origin".to_owned(),
            });
        }
        if rule.allowed_methods.is_empty() {
            return Err(BucketError::InvalidConfig {
                message: "CORS rule must name at least one allowed method".to_owned(),
            });
        }
    }
    Ok(())
}

/// One lifecycle rule stored on a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    /// Optional identifier for the rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Key prefix the rule applies to; empty matches everything.
    #[serde(default)]
    pub prefix: String,
    /// Whether the rule is active.
    pub enabled: bool,
    /// Days after which current objects expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_days: Option<u32>,
    /// Days after which noncurrent versions expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noncurrent_expiration_days: Option<u32>,
}

/// Validate a lifecycle rule set.
///
/// # Errors
///
/// Returns [`BucketError::InvalidConfig`] when the set is empty, or a rule
/// has no action or a zero-day period.
pub fn validate_lifecycle(rules: &[LifecycleRule]) -> Result<(), BucketError> {
    if rules.is_empty() {
        return Err(BucketError::InvalidConfig {
            message: "lifecycle configuration must contain at least one rule".to_owned(),
        });
    }
    for rule in rules {
        if rule.expiration_days.is_none() && rule.noncurrent_expiration_days.is_none() {
            return Err(BucketError::InvalidConfig {
                message: "lifecycle rule must define at least one expiration action".to_owned(),
            });
        }
        if rule.expiration_days == Some(0) || rule.noncurrent_expiration_days == Some(0) {
            return Err(BucketError::InvalidConfig {
                message: "lifecycle expiration period must be positive".to_owned(),
            });
        }
    }
    Ok(())
}

/// A bucket tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    /// Tag key, 1-128 characters.
    pub key: String,
    /// Tag value, 0-256 characters.
    pub value: String,
}

/// Validate a tag set.
///
/// # Errors
///
/// Returns [`BucketError::InvalidConfig`] when there are too many tags or a
/// key/value exceeds its length limit.
pub fn validate_tags(tags: &[Tag]) -> Result<(), BucketError> {
    if tags.len() > MAX_TAGS {
        return Err(BucketError::InvalidConfig {
            message: format!("bucket tags cannot exceed {MAX_TAGS}, got {}", tags.len()),
        });
    }
    for tag in tags {
        if tag.key.is_empty() || tag.key.chars().count() > MAX_TAG_KEY_LEN {
            return Err(BucketError::InvalidConfig {
                message: format!("tag key must be 1-{MAX_TAG_KEY_LEN} characters"),
            });
        }
        if tag.value.chars().count() > MAX_TAG_VALUE_LEN {
            return Err(BucketError::InvalidConfig {
                message: format!("tag value must not exceed {MAX_TAG_VALUE_LEN} characters"),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Metrics and the descriptor
// ---------------------------------------------------------------------------

/// Cached bucket metrics, maintained by delta updates and rebuilt by the
/// reconciler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetrics {
    /// Number of live objects.
    pub object_count: u64,
    /// Total live payload bytes.
    pub total_size: u64,
}

/// The authoritative bucket record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDescriptor {
    /// Owning tenant.
    pub tenant_id: String,
    /// Bucket name, globally unique across the cluster.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Region string.
    pub region: String,
    /// Bucket owner.
    pub owner: Owner,
    /// Cached object count and total size.
    #[serde(default)]
    pub metrics: BucketMetrics,
    /// Versioning state.
    #[serde(default)]
    pub versioning: VersioningState,
    /// Canned ACL.
    #[serde(default)]
    pub acl: CannedAcl,
    /// Object-lock configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_lock: Option<ObjectLockConfig>,
    /// Lifecycle rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Vec<LifecycleRule>>,
    /// CORS rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors: Option<Vec<CorsRuleConfig>>,
    /// Bucket policy document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyDocument>,
    /// Bucket tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

impl BucketDescriptor {
    /// Create a fresh descriptor with default subresources.
    #[must_use]
    pub fn new(tenant_id: &str, name: &str, region: &str, owner: Owner) -> Self {
        Self {
            tenant_id: tenant_id.to_owned(),
            name: name.to_owned(),
            created_at: Utc::now(),
            region: region.to_owned(),
            owner,
            metrics: BucketMetrics::default(),
            versioning: VersioningState::default(),
            acl: CannedAcl::default(),
            object_lock: None,
            lifecycle: None,
            cors: None,
            policy: None,
            tags: None,
        }
    }

    /// Whether object lock is enabled on this bucket.
    #[must_use]
    pub fn object_lock_enabled(&self) -> bool {
        self.object_lock.is_some_and(|config| config.enabled)
    }
}
