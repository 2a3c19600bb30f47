//! Scheduled-mode resyncs.
//!
//! Each scheduled rule is resynced on its own cadence: list the source
//! bucket under the rule's prefix and queue a PUT for every key, exactly as
//! a realtime mutation would. A non-blocking per-rule mutex guarantees at
//! most one sync per rule at any time; concurrent attempts get
//! `SyncInProgress` instead of queueing behind the running one. Realtime
//! workers never take this lock, so scheduled and realtime traffic for the
//! same rule is expected to overlap.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use maxiofs_core::ObjectSource;

use crate::enqueuer;
use crate::error::{ReplicationError, ReplicationResult};
use crate::queue::QueueAction;
use crate::rule::ReplicationRule;
use crate::store::ReplicationStore;

/// Listing cap for one resync pass.
const MAX_SYNC_KEYS: usize = 10_000;

/// Per-rule sync exclusion and last-sync bookkeeping.
///
/// Both maps are keyed by rule id; entries are created lazily on first use
/// and never removed (rule cardinality is bounded in practice).
#[derive(Default)]
pub struct RuleScheduler {
    sync_locks: DashMap<String, Arc<Mutex<()>>>,
    last_sync: DashMap<String, DateTime<Utc>>,
}

impl std::fmt::Debug for RuleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleScheduler")
            .field("tracked_rules", &self.sync_locks.len())
            .finish()
    }
}

impl RuleScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the rule's interval has elapsed since its last sync. A rule
    /// that has never synced is due immediately.
    #[must_use]
    pub fn is_due(&self, rule: &ReplicationRule, now: DateTime<Utc>) -> bool {
        match self.last_sync.get(&rule.id) {
            None => true,
            Some(last) => now - *last >= Duration::minutes(rule.schedule_interval),
        }
    }

    /// Run a full resync for one rule.
    ///
    /// Lists up to 10 000 source keys under the rule's prefix and queues a
    /// PUT for each through the regular enqueue path. Returns the number of
    /// keys queued.
    ///
    /// # Errors
    ///
    /// - [`ReplicationError::SyncInProgress`] if a sync for this rule is
    ///   already running; overlapping calls are rejected, never queued.
    /// - [`ReplicationError::RuleNotFound`] if the rule is gone.
    pub async fn sync_rule(
        &self,
        store: &ReplicationStore,
        source: &dyn ObjectSource,
        max_retries: i64,
        rule_id: &str,
    ) -> ReplicationResult<usize> {
        let lock = self.sync_lock(rule_id);
        let Ok(_guard) = lock.try_lock() else {
            return Err(ReplicationError::SyncInProgress {
                id: rule_id.to_owned(),
            });
        };

        let rule = store
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| ReplicationError::RuleNotFound {
                id: rule_id.to_owned(),
            })?;

        let keys = source
            .list(
                &rule.tenant_id,
                &rule.source_bucket,
                &rule.prefix,
                MAX_SYNC_KEYS,
            )
            .await?;

        let mut queued = 0;
        for key in &keys {
            enqueuer::queue_object(
                store,
                &rule.tenant_id,
                &rule.source_bucket,
                key,
                QueueAction::Put,
                max_retries,
            )
            .await?;
            queued += 1;
        }

        self.last_sync.insert(rule_id.to_owned(), Utc::now());
        info!(rule_id, bucket = %rule.source_bucket, queued, "scheduled sync complete");
        Ok(queued)
    }

    /// Per-rule mutex, created lazily and never removed.
    fn sync_lock(&self, rule_id: &str) -> Arc<Mutex<()>> {
        self.sync_locks
            .entry(rule_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
