//! Replication error types.
//!
//! Remote transport failures are retriable by construction: the worker
//! requeues the row until its attempt ceiling, at which point the same
//! error becomes terminal. Nothing here ever propagates to the caller of
//! the original object mutation.

use maxiofs_core::CoreError;

/// Error produced by the replication engine.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// The relational store reported a failure.
    #[error("replication database failure: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration failed to apply.
    #[error("replication migration failure: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The referenced rule does not exist.
    #[error("replication rule not found: {id}")]
    RuleNotFound {
        /// The missing rule id.
        id: String,
    },

    /// A rule failed validation.
    #[error("invalid replication rule: {message}")]
    InvalidRule {
        /// Why the rule was rejected.
        message: String,
    },

    /// A sync is already running for this rule.
    #[error("sync already in progress for rule {id}")]
    SyncInProgress {
        /// The rule being synced.
        id: String,
    },

    /// The remote endpoint rejected or dropped a call. Retriable until the
    /// row's attempt ceiling.
    #[error("remote replication failure: {message}")]
    Remote {
        /// Description of the transport failure.
        message: String,
    },

    /// Reading local data for replication failed.
    #[error(transparent)]
    Source(#[from] CoreError),
}

impl ReplicationError {
    /// Shorthand for a remote transport failure.
    #[must_use]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }
}

/// Convenience result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;
