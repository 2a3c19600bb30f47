//! Asynchronous cross-site replication for MaxIOFS.
//!
//! The engine turns local object mutations into durable queue rows (one
//! per matching rule), drains them through a bounded dispatch channel with
//! a pool of workers that PUT/DELETE against remote S3-compatible
//! endpoints, resyncs scheduled rules on their cadence, and reaps terminal
//! rows past retention.
//!
//! # Architecture
//!
//! ```text
//!  mutation ----> queue_object ----> replication_queue (SQLite, durable)
//!                                         |
//!                 loader (10 s tick) -----+--> bounded channel
//!                                                  |
//!                 worker pool <--------------------+
//!                     |
//!                     +--> RemoteClient (aws-sdk-s3, per-rule credentials)
//!                     +--> row transitions + replication_status upserts
//!
//!  scheduler (60 s tick) --> per-rule exclusive SyncRule --> queue_object
//!  reaper (24 h tick) ----> delete terminal rows past retention
//! ```
//!
//! Replication failures never surface to the caller of the original
//! mutation; they live in `replication_queue.last_error` and are
//! observable through [`ReplicationEngine::get_metrics`].

pub mod config;
pub mod engine;
mod enqueuer;
pub mod error;
pub mod queue;
pub mod remote;
pub mod rule;
pub mod scheduler;
pub mod store;
mod worker;

pub use config::ReplicationConfig;
pub use engine::ReplicationEngine;
pub use error::{ReplicationError, ReplicationResult};
pub use queue::{QueueAction, QueueItem, QueueStatus, RuleMetrics, StatusRecord};
pub use remote::{
    MemoryRemoteClient, MemoryRemoteClientFactory, MemoryRemoteStore, RemoteClient,
    RemoteClientFactory, S3RemoteClient, S3RemoteClientFactory,
};
pub use rule::{ConflictResolution, NewRule, ReplicationMode, ReplicationRule};
pub use scheduler::RuleScheduler;
pub use store::ReplicationStore;
