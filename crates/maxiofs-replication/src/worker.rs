//! Replication workers.
//!
//! Each worker loops on the shared dispatch channel until shutdown. Per
//! item: claim the row (`in_progress`, attempts + 1), load the rule, ship
//! the payload or deletion to the destination through a freshly-built
//! remote client, then record the terminal or retriable outcome. All row
//! transitions are single SQL updates; workers for the same rule never
//! coordinate beyond that, and the rule-level sync lock is never taken
//! here.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, warn};

use maxiofs_core::ObjectSource;

use crate::error::ReplicationResult;
use crate::queue::{QueueAction, QueueItem, QueueStatus, StatusRecord};
use crate::remote::RemoteClientFactory;
use crate::rule::ReplicationRule;
use crate::store::ReplicationStore;

/// Worker loop: receive, process, repeat until shutdown or channel close.
pub(crate) async fn run_worker(
    worker_id: usize,
    store: Arc<ReplicationStore>,
    source: Arc<dyn ObjectSource>,
    factory: Arc<dyn RemoteClientFactory>,
    in_flight: Arc<DashSet<i64>>,
    receiver: Arc<Mutex<mpsc::Receiver<QueueItem>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "replication worker started");
    loop {
        // Hold the receiver lock only while waiting; processing happens
        // with the lock released so other workers can pull work.
        let item = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                _ = shutdown.changed() => break,
                received = rx.recv() => match received {
                    Some(item) => item,
                    None => break,
                },
            }
        };

        process_item(&store, source.as_ref(), factory.as_ref(), &item).await;
        in_flight.remove(&item.id);
    }
    debug!(worker_id, "replication worker stopped");
}

/// Process one queue row end to end. Failures are recorded on the row,
/// never returned: replication errors must not surface anywhere else.
pub(crate) async fn process_item(
    store: &ReplicationStore,
    source: &dyn ObjectSource,
    factory: &dyn RemoteClientFactory,
    item: &QueueItem,
) {
    let attempts = match store.claim_in_progress(item.id).await {
        Ok(attempts) => attempts,
        Err(err) => {
            warn!(queue_id = item.id, error = %err, "failed to claim queue row");
            return;
        }
    };

    match replicate(store, source, factory, item).await {
        Ok((bytes, rule)) => {
            if let Err(err) = store.mark_completed(item.id, i64::try_from(bytes).unwrap_or(i64::MAX)).await {
                warn!(queue_id = item.id, error = %err, "failed to record completion");
                return;
            }
            record_status(store, item, &rule, QueueStatus::Completed, "").await;
            debug!(
                queue_id = item.id,
                key = %item.object_key,
                bytes,
                attempts,
                "replicated"
            );
        }
        Err((message, rule)) => {
            let terminal = attempts >= item.max_retries;
            let update = if terminal {
                store.mark_failed(item.id, &message).await
            } else {
                store.requeue_pending(item.id, &message).await
            };
            if let Err(err) = update {
                warn!(queue_id = item.id, error = %err, "failed to record outcome");
                return;
            }
            if terminal {
                if let Some(rule) = rule {
                    record_status(store, item, &rule, QueueStatus::Failed, &message).await;
                }
                warn!(
                    queue_id = item.id,
                    key = %item.object_key,
                    attempts,
                    error = %message,
                    "replication failed permanently"
                );
            } else {
                debug!(
                    queue_id = item.id,
                    key = %item.object_key,
                    attempts,
                    error = %message,
                    "replication failed, will retry"
                );
            }
        }
    }
}

/// Perform the remote side of one row. Returns the shipped byte count and
/// the rule, or the error text plus the rule if it was loaded.
async fn replicate(
    store: &ReplicationStore,
    source: &dyn ObjectSource,
    factory: &dyn RemoteClientFactory,
    item: &QueueItem,
) -> Result<(u64, ReplicationRule), (String, Option<ReplicationRule>)> {
    let rule = match store.get_rule(&item.rule_id).await {
        Ok(Some(rule)) if rule.enabled => rule,
        Ok(Some(_)) => return Err(("replication rule is disabled".to_owned(), None)),
        Ok(None) => return Err(("replication rule no longer exists".to_owned(), None)),
        Err(err) => return Err((err.to_string(), None)),
    };

    let result = match item.action {
        QueueAction::Put | QueueAction::Copy => put_to_destination(source, factory, &rule, item).await,
        QueueAction::Delete => delete_at_destination(factory, &rule, item).await,
    };

    match result {
        Ok(bytes) => Ok((bytes, rule)),
        Err(err) => Err((err.to_string(), Some(rule))),
    }
}

/// Read the object locally and PUT it to the destination. The destination
/// mirrors the source layout: the key is forwarded unmodified, prefix and
/// all.
async fn put_to_destination(
    source: &dyn ObjectSource,
    factory: &dyn RemoteClientFactory,
    rule: &ReplicationRule,
    item: &QueueItem,
) -> ReplicationResult<u64> {
    let stored = source
        .read(&item.tenant_id, &item.bucket, &item.object_key)
        .await?;
    let client = factory.client_for(rule)?;
    client
        .put_object(
            &rule.destination_bucket,
            &item.object_key,
            stored.data,
            stored.content_type.as_deref(),
            &stored.user_metadata,
        )
        .await
}

/// Propagate a deletion, or treat it as a successful no-op when the rule
/// does not replicate deletes.
async fn delete_at_destination(
    factory: &dyn RemoteClientFactory,
    rule: &ReplicationRule,
    item: &QueueItem,
) -> ReplicationResult<u64> {
    if !rule.replicate_deletes {
        debug!(key = %item.object_key, "delete replication disabled for rule, skipping");
        return Ok(0);
    }
    let client = factory.client_for(rule)?;
    client
        .delete_object(&rule.destination_bucket, &item.object_key)
        .await?;
    Ok(0)
}

/// Upsert the per-key status record with the outcome of this attempt.
async fn record_status(
    store: &ReplicationStore,
    item: &QueueItem,
    rule: &ReplicationRule,
    status: QueueStatus,
    error_message: &str,
) {
    let now = Utc::now();
    let record = StatusRecord {
        rule_id: item.rule_id.clone(),
        tenant_id: item.tenant_id.clone(),
        source_bucket: item.bucket.clone(),
        source_key: item.object_key.clone(),
        source_version_id: item.version_id.clone(),
        destination_bucket: rule.destination_bucket.clone(),
        destination_key: item.object_key.clone(),
        status,
        last_attempt: now,
        replicated_at: (status == QueueStatus::Completed).then_some(now),
        error_message: error_message.to_owned(),
    };
    if let Err(err) = store.upsert_status(&record).await {
        warn!(queue_id = item.id, error = %err, "failed to upsert status record");
    }
}
