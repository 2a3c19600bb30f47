//! Bucket-level error types.

use maxiofs_core::CoreError;

/// Error produced by the bucket metadata manager.
#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    /// The bucket name violates the naming rules.
    #[error("invalid bucket name: {name}: {reason}")]
    InvalidBucketName {
        /// The rejected name.
        name: String,
        /// The rule that was violated.
        reason: String,
    },

    /// A bucket with this name already exists somewhere in the cluster.
    #[error("bucket already exists: {bucket}")]
    BucketAlreadyExists {
        /// The name that is taken.
        bucket: String,
    },

    /// The bucket does not exist for this tenant.
    #[error("bucket not found: {bucket}")]
    BucketNotFound {
        /// The bucket that was not found.
        bucket: String,
    },

    /// The bucket still holds live objects.
    #[error("bucket not empty: {bucket}")]
    BucketNotEmpty {
        /// The non-empty bucket.
        bucket: String,
    },

    /// Object-lock retention forbids removing the bucket.
    #[error("bucket {bucket} holds objects under unexpired object-lock retention")]
    ObjectLockProtected {
        /// The protected bucket.
        bucket: String,
    },

    /// The bucket has no policy subresource.
    #[error("no policy configured for bucket: {bucket}")]
    NoSuchPolicy {
        /// The bucket without a policy.
        bucket: String,
    },

    /// The bucket has no lifecycle configuration.
    #[error("no lifecycle configuration for bucket: {bucket}")]
    NoSuchLifecycle {
        /// The bucket without a lifecycle configuration.
        bucket: String,
    },

    /// The bucket has no CORS configuration.
    #[error("no CORS configuration for bucket: {bucket}")]
    NoSuchCors {
        /// The bucket without a CORS configuration.
        bucket: String,
    },

    /// The bucket has no tag set.
    #[error("no tag set for bucket: {bucket}")]
    NoSuchTagSet {
        /// The bucket without tags.
        bucket: String,
    },

    /// The bucket has no object-lock configuration.
    #[error("no object-lock configuration for bucket: {bucket}")]
    ObjectLockNotFound {
        /// The bucket without an object-lock configuration.
        bucket: String,
    },

    /// A subresource configuration failed validation.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        message: String,
    },

    /// A policy document failed to parse.
    #[error(transparent)]
    Policy(#[from] maxiofs_policy::PolicyError),

    /// The underlying stores reported a failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience result type for bucket operations.
pub type BucketResult<T> = Result<T, BucketError>;
