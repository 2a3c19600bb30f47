//! Replication engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Configuration for the replication engine.
///
/// # Examples
///
/// ```
/// use maxiofs_replication::config::ReplicationConfig;
///
/// let config = ReplicationConfig::default();
/// assert_eq!(config.worker_count, 5);
/// assert_eq!(config.queue_size, 1000);
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationConfig {
    /// Number of concurrent replication workers.
    #[builder(default = 5)]
    pub worker_count: usize,

    /// Capacity of the in-memory dispatch channel.
    #[builder(default = 1000)]
    pub queue_size: usize,

    /// Maximum rows the loader pulls per tick.
    #[builder(default = 100)]
    pub batch_size: i64,

    /// Minimum delay before a failed row is re-surfaced, in seconds.
    #[builder(default = 300)]
    pub retry_interval_secs: u64,

    /// Per-row retry ceiling.
    #[builder(default = 3)]
    pub max_retries: i64,

    /// Reaper cadence, in seconds.
    #[builder(default = 86_400)]
    pub cleanup_interval_secs: u64,

    /// Terminal rows older than this many days are reaped.
    #[builder(default = 30)]
    pub retention_days: i64,

    /// Loader cadence, in seconds.
    #[builder(default = 10)]
    pub load_interval_secs: u64,

    /// Scheduler cadence, in seconds.
    #[builder(default = 60)]
    pub schedule_tick_secs: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            queue_size: 1000,
            batch_size: 100,
            retry_interval_secs: 300,
            max_retries: 3,
            cleanup_interval_secs: 86_400,
            retention_days: 30,
            load_interval_secs: 10,
            schedule_tick_secs: 60,
        }
    }
}

impl ReplicationConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `REPLICATION_WORKER_COUNT` | `5` |
    /// | `REPLICATION_QUEUE_SIZE` | `1000` |
    /// | `REPLICATION_BATCH_SIZE` | `100` |
    /// | `REPLICATION_RETRY_INTERVAL_SECS` | `300` |
    /// | `REPLICATION_MAX_RETRIES` | `3` |
    /// | `REPLICATION_CLEANUP_INTERVAL_SECS` | `86400` |
    /// | `REPLICATION_RETENTION_DAYS` | `30` |
    /// | `REPLICATION_LOAD_INTERVAL_SECS` | `10` |
    /// | `REPLICATION_SCHEDULE_TICK_SECS` | `60` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse("REPLICATION_WORKER_COUNT") {
            config.worker_count = n;
        }
        if let Some(n) = env_parse("REPLICATION_QUEUE_SIZE") {
            config.queue_size = n;
        }
        if let Some(n) = env_parse("REPLICATION_BATCH_SIZE") {
            config.batch_size = n;
        }
        if let Some(n) = env_parse("REPLICATION_RETRY_INTERVAL_SECS") {
            config.retry_interval_secs = n;
        }
        if let Some(n) = env_parse("REPLICATION_MAX_RETRIES") {
            config.max_retries = n;
        }
        if let Some(n) = env_parse("REPLICATION_CLEANUP_INTERVAL_SECS") {
            config.cleanup_interval_secs = n;
        }
        if let Some(n) = env_parse("REPLICATION_RETENTION_DAYS") {
            config.retention_days = n;
        }
        if let Some(n) = env_parse("REPLICATION_LOAD_INTERVAL_SECS") {
            config.load_interval_secs = n;
        }
        if let Some(n) = env_parse("REPLICATION_SCHEDULE_TICK_SECS") {
            config.schedule_tick_secs = n;
        }

        config
    }

    /// Loader cadence as a [`Duration`].
    #[must_use]
    pub fn load_interval(&self) -> Duration {
        Duration::from_secs(self.load_interval_secs)
    }

    /// Retry backoff as a [`Duration`].
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Reaper cadence as a [`Duration`].
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Scheduler cadence as a [`Duration`].
    #[must_use]
    pub fn schedule_tick(&self) -> Duration {
        Duration::from_secs(self.schedule_tick_secs)
    }
}

/// Parse one environment variable, ignoring unset or malformed values.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
