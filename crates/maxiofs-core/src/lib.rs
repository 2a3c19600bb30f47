//! Core contracts shared by the MaxIOFS bucket and replication subsystems.
//!
//! This crate defines the narrow adapter interfaces the rest of the core is
//! written against, plus in-memory implementations used by tests and
//! single-node deployments:
//!
//! - [`MetadataStore`]: the key-value metadata store holding JSON-encoded
//!   bucket descriptors and per-object records.
//! - [`ObjectStore`]: the payload backend addressed by flat physical keys
//!   (`<tenant>/<bucket>/<key>`).
//! - [`ObjectSource`]: the replication engine's read-side view of local
//!   data (object bytes plus bucket listings).
//!
//! # Architecture
//!
//! ```text
//!  BucketManager ----> MetadataStore (descriptors, object records)
//!       |
//!       +------------> ObjectStore   (payloads, bucket markers)
//!
//!  ReplicationEngine -> ObjectSource (reads through both stores)
//! ```

pub mod error;
pub mod metadata;
pub mod object_store;
pub mod source;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use metadata::{MemoryMetadataStore, MetadataStore};
pub use object_store::{MemoryObjectStore, ObjectStore};
pub use source::{ObjectSource, StoreObjectSource};
pub use types::{ObjectRecord, Owner, OwnerType, StoredObject, WriteSummary};
