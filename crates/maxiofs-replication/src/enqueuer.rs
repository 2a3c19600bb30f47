//! Translating object mutations into durable queue rows.
//!
//! `queue_object` runs synchronously with the caller of the original
//! mutation, but only ever writes to the relational store; it never touches
//! the dispatch channel, so it can never block on a full queue.

use tracing::debug;

use crate::error::ReplicationResult;
use crate::queue::QueueAction;
use crate::store::ReplicationStore;

/// Insert one pending queue row per enabled rule matching
/// `(tenant, bucket)` whose prefix filter accepts `key`. Returns the number
/// of rows inserted.
pub(crate) async fn queue_object(
    store: &ReplicationStore,
    tenant_id: &str,
    bucket: &str,
    key: &str,
    action: QueueAction,
    max_retries: i64,
) -> ReplicationResult<usize> {
    let rules = store.enabled_rules_for_bucket(tenant_id, bucket).await?;

    let mut inserted = 0;
    for rule in &rules {
        if !rule.matches_key(key) {
            continue;
        }
        store
            .enqueue(&rule.id, tenant_id, bucket, key, "", action, max_retries)
            .await?;
        inserted += 1;
    }

    if inserted > 0 {
        debug!(tenant_id, bucket, key, %action, inserted, "object queued for replication");
    }
    Ok(inserted)
}
