//! Queue rows, status records, and per-rule metrics.
//!
//! The relational store is the durable home of every work item; the
//! in-memory dispatch channel only carries copies. Row state transitions
//! are single SQL updates, so each row's history is linearizable even with
//! many workers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReplicationError;

/// What a queue row asks the worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueAction {
    /// Replicate the object's current payload.
    Put,
    /// Replicate a server-side copy (processed identically to `Put`).
    Copy,
    /// Propagate a deletion.
    Delete,
}

impl QueueAction {
    /// The canonical string stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Copy => "COPY",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueAction {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUT" => Ok(Self::Put),
            "COPY" => Ok(Self::Copy),
            "DELETE" => Ok(Self::Delete),
            other => Err(ReplicationError::InvalidRule {
                message: format!("unknown queue action: {other}"),
            }),
        }
    }
}

/// Lifecycle state of a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for the loader to dispatch it.
    Pending,
    /// Claimed by a worker.
    InProgress,
    /// Replicated successfully (terminal).
    Completed,
    /// Exhausted its attempts (terminal).
    Failed,
    /// Reserved intermediate state; rows awaiting retry are `Pending`.
    Retrying,
}

impl QueueStatus {
    /// The canonical string stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    /// Whether this state is terminal (reapable).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            other => Err(ReplicationError::InvalidRule {
                message: format!("unknown queue status: {other}"),
            }),
        }
    }
}

/// One durable unit of replication work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Monotonically increasing row id.
    pub id: i64,
    /// Owning rule.
    pub rule_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Source bucket.
    pub bucket: String,
    /// Source object key; also the destination key.
    pub object_key: String,
    /// Source version id, empty when unversioned.
    pub version_id: String,
    /// What to do.
    pub action: QueueAction,
    /// Current lifecycle state.
    pub status: QueueStatus,
    /// Processing rounds consumed so far.
    pub attempts: i64,
    /// Attempt ceiling.
    pub max_retries: i64,
    /// Last recorded error text, empty when none.
    pub last_error: String,
    /// When the row became eligible for dispatch.
    pub scheduled_at: DateTime<Utc>,
    /// When a worker last touched the row.
    pub processed_at: Option<DateTime<Utc>>,
    /// Set exactly when the row completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Bytes shipped to the destination.
    pub bytes_replicated: i64,
}

/// Most recent replication outcome for one `(rule, key, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    /// Owning rule.
    pub rule_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Source bucket.
    pub source_bucket: String,
    /// Source key.
    pub source_key: String,
    /// Source version id, empty when unversioned.
    pub source_version_id: String,
    /// Destination bucket.
    pub destination_bucket: String,
    /// Destination key (equals the source key).
    pub destination_key: String,
    /// Outcome of the most recent attempt.
    pub status: QueueStatus,
    /// When the most recent attempt ran.
    pub last_attempt: DateTime<Utc>,
    /// When the object last replicated successfully.
    pub replicated_at: Option<DateTime<Utc>>,
    /// Error text of the most recent failure, empty on success.
    pub error_message: String,
}

/// Aggregated queue counters for one rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMetrics {
    /// All queue rows for the rule.
    pub total_objects: i64,
    /// Rows waiting for dispatch.
    pub pending_objects: i64,
    /// Rows claimed by workers.
    pub in_progress_objects: i64,
    /// Rows replicated successfully.
    pub completed_objects: i64,
    /// Rows that exhausted their attempts.
    pub failed_objects: i64,
    /// Total bytes shipped.
    pub bytes_replicated: i64,
    /// Most recent error recorded on any row.
    pub last_error: Option<String>,
}
