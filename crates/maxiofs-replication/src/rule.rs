//! Replication rules.
//!
//! A rule binds one source bucket to one destination endpoint + bucket,
//! with static credentials, an optional key prefix filter, and a mode
//! (realtime, scheduled, batch). `conflict_resolution` and
//! `replicate_metadata` are persisted and exposed through the API but no
//! core code path branches on them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::{ReplicationError, ReplicationResult};

/// How replication for a rule is triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Each object mutation enqueues work immediately.
    #[default]
    Realtime,
    /// A full bucket resync runs on a fixed cadence.
    Scheduled,
    /// Work is enqueued in bulk by an external driver.
    Batch,
}

impl ReplicationMode {
    /// The canonical string stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Scheduled => "scheduled",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicationMode {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "realtime" => Ok(Self::Realtime),
            "scheduled" => Ok(Self::Scheduled),
            "batch" => Ok(Self::Batch),
            other => Err(ReplicationError::InvalidRule {
                message: format!("unknown replication mode: {other}"),
            }),
        }
    }
}

/// Declared conflict policy. Stored and exposed; not enforced at
/// replication time (the destination store is last-writer-wins on key).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// The write with the latest timestamp prevails.
    #[default]
    LastWriteWins,
    /// The higher version wins.
    VersionBased,
    /// The primary site's copy wins.
    PrimaryWins,
}

impl ConflictResolution {
    /// The canonical string stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastWriteWins => "last_write_wins",
            Self::VersionBased => "version_based",
            Self::PrimaryWins => "primary_wins",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_write_wins" => Ok(Self::LastWriteWins),
            "version_based" => Ok(Self::VersionBased),
            "primary_wins" => Ok(Self::PrimaryWins),
            other => Err(ReplicationError::InvalidRule {
                message: format!("unknown conflict resolution: {other}"),
            }),
        }
    }
}

/// A persisted replication rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationRule {
    /// Rule identifier (UUID).
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Bucket whose mutations this rule replicates.
    pub source_bucket: String,
    /// S3-compatible endpoint URL of the destination site.
    pub destination_endpoint: String,
    /// Destination bucket name.
    pub destination_bucket: String,
    /// Static access key for the destination.
    pub destination_access_key: String,
    /// Static secret key for the destination.
    pub destination_secret_key: String,
    /// Destination region; empty means the client default (`us-east-1`).
    pub destination_region: String,
    /// Key prefix filter; empty matches every key.
    pub prefix: String,
    /// Whether the rule is active.
    pub enabled: bool,
    /// Listing priority (higher first).
    pub priority: i64,
    /// How replication is triggered.
    pub mode: ReplicationMode,
    /// Resync cadence in minutes; positive iff `mode` is `Scheduled`.
    pub schedule_interval: i64,
    /// Declared conflict policy.
    pub conflict_resolution: ConflictResolution,
    /// Whether deletions propagate to the destination.
    pub replicate_deletes: bool,
    /// Whether user metadata propagates to the destination.
    pub replicate_metadata: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ReplicationRule {
    /// Whether `key` passes this rule's prefix filter.
    #[must_use]
    pub fn matches_key(&self, key: &str) -> bool {
        self.prefix.is_empty() || key.starts_with(&self.prefix)
    }

    /// The effective destination region, defaulting to `us-east-1`.
    #[must_use]
    pub fn effective_region(&self) -> &str {
        if self.destination_region.is_empty() {
            "us-east-1"
        } else {
            &self.destination_region
        }
    }
}

/// Input for creating a rule. Everything optional carries the stored
/// defaults.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewRule {
    /// Owning tenant.
    #[builder(setter(into))]
    pub tenant_id: String,
    /// Bucket whose mutations this rule replicates.
    #[builder(setter(into))]
    pub source_bucket: String,
    /// S3-compatible endpoint URL of the destination site.
    #[builder(setter(into))]
    pub destination_endpoint: String,
    /// Destination bucket name.
    #[builder(setter(into))]
    pub destination_bucket: String,
    /// Static access key for the destination.
    #[builder(setter(into))]
    pub destination_access_key: String,
    /// Static secret key for the destination.
    #[builder(setter(into))]
    pub destination_secret_key: String,
    /// Destination region; empty means the client default.
    #[builder(default, setter(into))]
    pub destination_region: String,
    /// Key prefix filter; empty matches every key.
    #[builder(default, setter(into))]
    pub prefix: String,
    /// Whether the rule starts enabled.
    #[builder(default = true)]
    pub enabled: bool,
    /// Listing priority (higher first).
    #[builder(default = 0)]
    pub priority: i64,
    /// How replication is triggered.
    #[builder(default)]
    pub mode: ReplicationMode,
    /// Resync cadence in minutes; required positive for scheduled mode.
    #[builder(default = 0)]
    pub schedule_interval: i64,
    /// Declared conflict policy.
    #[builder(default)]
    pub conflict_resolution: ConflictResolution,
    /// Whether deletions propagate.
    #[builder(default = true)]
    pub replicate_deletes: bool,
    /// Whether user metadata propagates.
    #[builder(default = true)]
    pub replicate_metadata: bool,
}

impl NewRule {
    /// Validate the input and mint a persisted rule.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::InvalidRule`] when a required field is
    /// empty, the priority is negative, or the schedule interval does not
    /// agree with the mode.
    pub fn into_rule(self) -> ReplicationResult<ReplicationRule> {
        for (field, value) in [
            ("tenant_id", &self.tenant_id),
            ("source_bucket", &self.source_bucket),
            ("destination_endpoint", &self.destination_endpoint),
            ("destination_bucket", &self.destination_bucket),
            ("destination_access_key", &self.destination_access_key),
            ("destination_secret_key", &self.destination_secret_key),
        ] {
            if value.is_empty() {
                return Err(ReplicationError::InvalidRule {
                    message: format!("{field} must not be empty"),
                });
            }
        }
        if self.priority < 0 {
            return Err(ReplicationError::InvalidRule {
                message: "priority must not be negative".to_owned(),
            });
        }
        match self.mode {
            ReplicationMode::Scheduled if self.schedule_interval <= 0 => {
                return Err(ReplicationError::InvalidRule {
                    message: "scheduled rules require a positive schedule interval".to_owned(),
                });
            }
            ReplicationMode::Realtime | ReplicationMode::Batch if self.schedule_interval > 0 => {
                return Err(ReplicationError::InvalidRule {
                    message: "schedule interval is only valid for scheduled rules".to_owned(),
                });
            }
            _ => {}
        }

        let now = Utc::now();
        Ok(ReplicationRule {
            id: Uuid::new_v4().to_string(),
            tenant_id: self.tenant_id,
            source_bucket: self.source_bucket,
            destination_endpoint: self.destination_endpoint,
            destination_bucket: self.destination_bucket,
            destination_access_key: self.destination_access_key,
            destination_secret_key: self.destination_secret_key,
            destination_region: self.destination_region,
            prefix: self.prefix,
            enabled: self.enabled,
            priority: self.priority,
            mode: self.mode,
            schedule_interval: self.schedule_interval,
            conflict_resolution: self.conflict_resolution,
            replicate_deletes: self.replicate_deletes,
            replicate_metadata: self.replicate_metadata,
            created_at: now,
            updated_at: now,
        })
    }
}
