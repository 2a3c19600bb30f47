//! The replication engine.
//!
//! Owns the background machinery: the queue loader, the worker pool, the
//! rule scheduler, and the cleanup reaper, all running as tokio tasks that
//! select between their interval tick and a shared shutdown signal.
//!
//! Durability lives in the relational store; the bounded mpsc channel
//! between loader and workers only carries copies of rows, and an
//! in-memory in-flight set keeps the loader from dispatching the same row
//! twice while a copy is still queued or being processed. Dropping a
//! channel entry can never lose work.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashSet;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use maxiofs_core::ObjectSource;

use crate::config::ReplicationConfig;
use crate::enqueuer;
use crate::error::{ReplicationError, ReplicationResult};
use crate::queue::{QueueAction, QueueItem, RuleMetrics, StatusRecord};
use crate::remote::RemoteClientFactory;
use crate::rule::{NewRule, ReplicationRule};
use crate::scheduler::RuleScheduler;
use crate::store::ReplicationStore;
use crate::worker;

/// Handles owned by a started engine.
struct EngineRuntime {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Orchestrates rules, the durable queue, and the background tasks that
/// drain it.
pub struct ReplicationEngine {
    store: Arc<ReplicationStore>,
    source: Arc<dyn ObjectSource>,
    factory: Arc<dyn RemoteClientFactory>,
    config: ReplicationConfig,
    scheduler: Arc<RuleScheduler>,
    in_flight: Arc<DashSet<i64>>,
    runtime: Mutex<Option<EngineRuntime>>,
}

impl std::fmt::Debug for ReplicationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReplicationEngine {
    /// Create an engine. Nothing runs until [`ReplicationEngine::start`].
    #[must_use]
    pub fn new(
        store: Arc<ReplicationStore>,
        source: Arc<dyn ObjectSource>,
        factory: Arc<dyn RemoteClientFactory>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            store,
            source,
            factory,
            config,
            scheduler: Arc::new(RuleScheduler::new()),
            in_flight: Arc::new(DashSet::new()),
            runtime: Mutex::new(None),
        }
    }

    /// The underlying relational store, shared with collaborators that own
    /// cascade duties (for example dropping a deleted bucket's queue rows).
    #[must_use]
    pub fn store(&self) -> &Arc<ReplicationStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the loader, worker pool, scheduler, and reaper. Idempotent: a
    /// second call on a running engine is a no-op.
    pub async fn start(&self) {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            warn!("replication engine already started");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<QueueItem>(self.config.queue_size);
        let receiver = Arc::new(Mutex::new(dispatch_rx));

        let mut handles = Vec::with_capacity(self.config.worker_count + 3);

        handles.push(tokio::spawn(run_loader(
            self.store.clone(),
            self.config.clone(),
            dispatch_tx,
            self.in_flight.clone(),
            shutdown_rx.clone(),
        )));

        for worker_id in 0..self.config.worker_count {
            handles.push(tokio::spawn(worker::run_worker(
                worker_id,
                self.store.clone(),
                self.source.clone(),
                self.factory.clone(),
                self.in_flight.clone(),
                receiver.clone(),
                shutdown_rx.clone(),
            )));
        }

        handles.push(tokio::spawn(run_scheduler(
            self.store.clone(),
            self.source.clone(),
            self.scheduler.clone(),
            self.config.clone(),
            shutdown_rx.clone(),
        )));

        handles.push(tokio::spawn(run_reaper(
            self.store.clone(),
            self.config.clone(),
            shutdown_rx,
        )));

        *runtime = Some(EngineRuntime {
            shutdown_tx,
            handles,
        });
        info!(
            workers = self.config.worker_count,
            queue_size = self.config.queue_size,
            "replication engine started"
        );
    }

    /// Stop the engine: signal shutdown, wait for in-flight workers to
    /// finish their current item, then release the dispatch channel.
    pub async fn stop(&self) {
        let Some(runtime) = self.runtime.lock().await.take() else {
            return;
        };

        let _ = runtime.shutdown_tx.send(true);
        for handle in runtime.handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "replication task join failed");
            }
        }
        // Items still in the (now dropped) channel were never processed;
        // forget them so a restarted engine can dispatch their rows again.
        self.in_flight.clear();
        info!("replication engine stopped");
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    /// Validate and persist a new rule.
    pub async fn create_rule(&self, input: NewRule) -> ReplicationResult<ReplicationRule> {
        let rule = input.into_rule()?;
        self.store.create_rule(&rule).await?;
        Ok(rule)
    }

    /// Fetch one rule.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::RuleNotFound`] if the rule is gone.
    pub async fn get_rule(&self, id: &str) -> ReplicationResult<ReplicationRule> {
        self.store
            .get_rule(id)
            .await?
            .ok_or_else(|| ReplicationError::RuleNotFound { id: id.to_owned() })
    }

    /// Persist every mutable field of an existing rule.
    pub async fn update_rule(&self, rule: &ReplicationRule) -> ReplicationResult<()> {
        self.store.update_rule(rule).await
    }

    /// Delete a rule and, by cascade, its queue rows and status records.
    pub async fn delete_rule(&self, id: &str) -> ReplicationResult<()> {
        self.store.delete_rule(id).await
    }

    /// List a tenant's rules, highest priority first.
    pub async fn list_rules(&self, tenant_id: &str) -> ReplicationResult<Vec<ReplicationRule>> {
        self.store.list_rules(tenant_id).await
    }

    // -----------------------------------------------------------------------
    // Work intake and inspection
    // -----------------------------------------------------------------------

    /// Record an object mutation: one pending queue row per matching
    /// enabled rule. Runs synchronously with the mutation's caller but
    /// never blocks on the dispatch channel.
    pub async fn queue_object(
        &self,
        tenant_id: &str,
        bucket: &str,
        key: &str,
        action: QueueAction,
    ) -> ReplicationResult<usize> {
        enqueuer::queue_object(
            &self.store,
            tenant_id,
            bucket,
            key,
            action,
            self.config.max_retries,
        )
        .await
    }

    /// Run a full resync for one rule, mutually exclusive with itself.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::SyncInProgress`] when a sync for the rule is
    /// already running.
    pub async fn sync_rule(&self, rule_id: &str) -> ReplicationResult<usize> {
        self.scheduler
            .sync_rule(
                &self.store,
                self.source.as_ref(),
                self.config.max_retries,
                rule_id,
            )
            .await
    }

    /// Aggregated queue counters for one rule.
    pub async fn get_metrics(&self, rule_id: &str) -> ReplicationResult<RuleMetrics> {
        self.store.rule_metrics(rule_id).await
    }

    /// The most recent outcome for `(rule, key, version)`, if any attempt
    /// has been recorded.
    pub async fn get_status(
        &self,
        rule_id: &str,
        source_bucket: &str,
        source_key: &str,
        source_version_id: &str,
    ) -> ReplicationResult<Option<StatusRecord>> {
        self.store
            .get_status(rule_id, source_bucket, source_key, source_version_id)
            .await
    }
}

// ---------------------------------------------------------------------------
// Background loops
// ---------------------------------------------------------------------------

/// Queue loader: pull dispatchable rows, push copies into the bounded
/// channel without blocking. Rows that do not fit stay in the store and
/// are picked up on a later tick.
async fn run_loader(
    store: Arc<ReplicationStore>,
    config: ReplicationConfig,
    dispatch_tx: mpsc::Sender<QueueItem>,
    in_flight: Arc<DashSet<i64>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.load_interval());
    let retry_backoff = ChronoDuration::from_std(config.retry_interval())
        .unwrap_or_else(|_| ChronoDuration::zero());

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("queue loader stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        let items = match store
            .load_dispatchable(config.batch_size, Utc::now() - retry_backoff)
            .await
        {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "queue load failed");
                continue;
            }
        };

        for item in items {
            // Skip rows that are already in the channel or being processed.
            if !in_flight.insert(item.id) {
                continue;
            }
            let id = item.id;
            match dispatch_tx.try_send(item) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Backpressure: the row stays pending in the store.
                    in_flight.remove(&id);
                    debug!("dispatch channel full, deferring remaining rows");
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    in_flight.remove(&id);
                    return;
                }
            }
        }
    }
}

/// Rule scheduler loop: every tick, resync the scheduled rules whose
/// interval has elapsed.
async fn run_scheduler(
    store: Arc<ReplicationStore>,
    source: Arc<dyn ObjectSource>,
    scheduler: Arc<RuleScheduler>,
    config: ReplicationConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.schedule_tick());

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("rule scheduler stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        let rules = match store.scheduled_rules().await {
            Ok(rules) => rules,
            Err(err) => {
                warn!(error = %err, "scheduled rule listing failed");
                continue;
            }
        };

        let now = Utc::now();
        for rule in rules {
            if !scheduler.is_due(&rule, now) {
                continue;
            }
            match scheduler
                .sync_rule(&store, source.as_ref(), config.max_retries, &rule.id)
                .await
            {
                Ok(queued) => debug!(rule_id = %rule.id, queued, "scheduled sync ran"),
                Err(ReplicationError::SyncInProgress { .. }) => {
                    debug!(rule_id = %rule.id, "sync already running, skipping");
                }
                Err(err) => warn!(rule_id = %rule.id, error = %err, "scheduled sync failed"),
            }
        }
    }
}

/// Cleanup reaper: drop terminal rows past the retention horizon.
async fn run_reaper(
    store: Arc<ReplicationStore>,
    config: ReplicationConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.cleanup_interval());
    // Skip the immediate first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("cleanup reaper stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        let cutoff = Utc::now() - ChronoDuration::days(config.retention_days);
        match store.cleanup_terminal(cutoff).await {
            Ok(reaped) => {
                if reaped > 0 {
                    info!(reaped, "reaped terminal replication rows");
                }
            }
            Err(err) => warn!(error = %err, "queue cleanup failed"),
        }
    }
}
