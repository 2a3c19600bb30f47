//! Bucket metadata management for MaxIOFS.
//!
//! The [`BucketManager`] is the authoritative owner of bucket state: the
//! JSON descriptors in the metadata store, the physical bucket markers in
//! the object store, the validated configuration subresources (versioning,
//! lifecycle, CORS, object lock, policy, ACL, tags), and the cached
//! `(object_count, total_size)` metrics.
//!
//! # Architecture
//!
//! ```text
//!  S3 front end (out of scope)
//!        |
//!        v
//!  BucketManager ---- per-bucket mutexes (metric serialization)
//!        |
//!        +-> MetadataStore  (descriptors, object records, global names)
//!        +-> ObjectStore    (bucket markers, payload cleanup)
//!        +-> maxiofs-policy (access decisions on the request path)
//! ```
//!
//! Metric deltas on the hot path are serialized per bucket; a background
//! [`reconciler`] periodically rebuilds the counters from the object
//! records as a safety net against drift.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod manager;
pub mod reconciler;
pub mod validation;

pub use config::BucketConfig;
pub use descriptor::{
    BucketDescriptor, BucketMetrics, CannedAcl, CorsRuleConfig, LifecycleRule, ObjectLockConfig,
    ObjectLockMode, ObjectLockRule, Tag, VersioningState,
};
pub use error::{BucketError, BucketResult};
pub use manager::BucketManager;
pub use reconciler::MetricsReconciler;
pub use validation::validate_bucket_name;
