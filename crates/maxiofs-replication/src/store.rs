//! The relational replication store.
//!
//! SQLite via sqlx. Every component shares this store; each operation is
//! one short statement (or transaction), and all row-state transitions are
//! single `UPDATE`s, which is what makes per-row history linearizable under
//! a concurrent worker pool.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{debug, info};

use crate::error::{ReplicationError, ReplicationResult};
use crate::queue::{QueueAction, QueueItem, QueueStatus, RuleMetrics, StatusRecord};
use crate::rule::ReplicationRule;

/// Handle to the replication tables.
#[derive(Clone)]
pub struct ReplicationStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for ReplicationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationStore").finish()
    }
}

impl ReplicationStore {
    /// Open (creating if missing) the database at `url` and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Database`] on connection failures and
    /// [`ReplicationError::Migration`] if the schema cannot be applied.
    pub async fn connect(url: &str) -> ReplicationResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // In-memory SQLite databases are per-connection; a second pooled
        // connection would see empty tables.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!(url, "running replication store migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Open a fresh in-memory store, for tests and ephemeral deployments.
    pub async fn in_memory() -> ReplicationResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    /// Persist a new rule.
    pub async fn create_rule(&self, rule: &ReplicationRule) -> ReplicationResult<()> {
        sqlx::query(
            r"INSERT INTO replication_rules (
                id, tenant_id, source_bucket, destination_endpoint,
                destination_bucket, destination_access_key, destination_secret_key,
                destination_region, prefix, enabled, priority, mode,
                schedule_interval, conflict_resolution, replicate_deletes,
                replicate_metadata, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.id)
        .bind(&rule.tenant_id)
        .bind(&rule.source_bucket)
        .bind(&rule.destination_endpoint)
        .bind(&rule.destination_bucket)
        .bind(&rule.destination_access_key)
        .bind(&rule.destination_secret_key)
        .bind(&rule.destination_region)
        .bind(&rule.prefix)
        .bind(rule.enabled)
        .bind(rule.priority)
        .bind(rule.mode.as_str())
        .bind(rule.schedule_interval)
        .bind(rule.conflict_resolution.as_str())
        .bind(rule.replicate_deletes)
        .bind(rule.replicate_metadata)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(rule_id = %rule.id, bucket = %rule.source_bucket, "rule created");
        Ok(())
    }

    /// Fetch one rule by id.
    pub async fn get_rule(&self, id: &str) -> ReplicationResult<Option<ReplicationRule>> {
        let row = sqlx::query("SELECT * FROM replication_rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| rule_from_row(&row)).transpose()
    }

    /// Update every mutable field of a rule; bumps `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::RuleNotFound`] if the rule is gone.
    pub async fn update_rule(&self, rule: &ReplicationRule) -> ReplicationResult<()> {
        let result = sqlx::query(
            r"UPDATE replication_rules SET
                source_bucket = ?, destination_endpoint = ?, destination_bucket = ?,
                destination_access_key = ?, destination_secret_key = ?,
                destination_region = ?, prefix = ?, enabled = ?, priority = ?,
                mode = ?, schedule_interval = ?, conflict_resolution = ?,
                replicate_deletes = ?, replicate_metadata = ?, updated_at = ?
            WHERE id = ?",
        )
        .bind(&rule.source_bucket)
        .bind(&rule.destination_endpoint)
        .bind(&rule.destination_bucket)
        .bind(&rule.destination_access_key)
        .bind(&rule.destination_secret_key)
        .bind(&rule.destination_region)
        .bind(&rule.prefix)
        .bind(rule.enabled)
        .bind(rule.priority)
        .bind(rule.mode.as_str())
        .bind(rule.schedule_interval)
        .bind(rule.conflict_resolution.as_str())
        .bind(rule.replicate_deletes)
        .bind(rule.replicate_metadata)
        .bind(Utc::now())
        .bind(&rule.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ReplicationError::RuleNotFound {
                id: rule.id.clone(),
            });
        }
        Ok(())
    }

    /// Delete a rule; its queue rows and status records cascade away.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::RuleNotFound`] if the rule is gone.
    pub async fn delete_rule(&self, id: &str) -> ReplicationResult<()> {
        let result = sqlx::query("DELETE FROM replication_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ReplicationError::RuleNotFound { id: id.to_owned() });
        }
        debug!(rule_id = id, "rule deleted");
        Ok(())
    }

    /// List a tenant's rules, highest priority first, oldest first within a
    /// priority.
    pub async fn list_rules(&self, tenant_id: &str) -> ReplicationResult<Vec<ReplicationRule>> {
        let rows = sqlx::query(
            "SELECT * FROM replication_rules WHERE tenant_id = ?
             ORDER BY priority DESC, created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rule_from_row).collect()
    }

    /// Enabled rules whose source is `(tenant, bucket)`, in listing order.
    pub async fn enabled_rules_for_bucket(
        &self,
        tenant_id: &str,
        bucket: &str,
    ) -> ReplicationResult<Vec<ReplicationRule>> {
        let rows = sqlx::query(
            "SELECT * FROM replication_rules
             WHERE tenant_id = ? AND source_bucket = ? AND enabled = 1
             ORDER BY priority DESC, created_at ASC",
        )
        .bind(tenant_id)
        .bind(bucket)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rule_from_row).collect()
    }

    /// Enabled scheduled rules with a positive interval, cluster-wide.
    pub async fn scheduled_rules(&self) -> ReplicationResult<Vec<ReplicationRule>> {
        let rows = sqlx::query(
            "SELECT * FROM replication_rules
             WHERE enabled = 1 AND mode = 'scheduled' AND schedule_interval > 0",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rule_from_row).collect()
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// Insert one pending queue row and return its id.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        rule_id: &str,
        tenant_id: &str,
        bucket: &str,
        object_key: &str,
        version_id: &str,
        action: QueueAction,
        max_retries: i64,
    ) -> ReplicationResult<i64> {
        let row = sqlx::query(
            r"INSERT INTO replication_queue (
                rule_id, tenant_id, bucket, object_key, version_id, action,
                status, attempts, max_retries, scheduled_at
            ) VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?)
            RETURNING id",
        )
        .bind(rule_id)
        .bind(tenant_id)
        .bind(bucket)
        .bind(object_key)
        .bind(version_id)
        .bind(action.as_str())
        .bind(max_retries)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        debug!(rule_id, bucket, object_key, %action, queue_id = id, "queued");
        Ok(id)
    }

    /// Rows eligible for dispatch: pending, plus failed rows below their
    /// attempt ceiling whose last processing is older than the retry
    /// backoff. Oldest scheduled first.
    pub async fn load_dispatchable(
        &self,
        batch_size: i64,
        retry_cutoff: DateTime<Utc>,
    ) -> ReplicationResult<Vec<QueueItem>> {
        let rows = sqlx::query(
            r"SELECT * FROM replication_queue
            WHERE status = 'pending'
               OR (status = 'failed' AND attempts < max_retries AND processed_at <= ?)
            ORDER BY scheduled_at ASC, id ASC
            LIMIT ?",
        )
        .bind(retry_cutoff)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// Claim a row for processing: `in_progress`, one more attempt, fresh
    /// `processed_at`. Returns the post-increment attempt count.
    pub async fn claim_in_progress(&self, id: i64) -> ReplicationResult<i64> {
        let row = sqlx::query(
            r"UPDATE replication_queue
            SET status = 'in_progress', attempts = attempts + 1, processed_at = ?
            WHERE id = ?
            RETURNING attempts",
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("attempts")?)
    }

    /// Terminal success: `completed`, `completed_at`, shipped bytes.
    pub async fn mark_completed(&self, id: i64, bytes_replicated: i64) -> ReplicationResult<()> {
        let now = Utc::now();
        sqlx::query(
            r"UPDATE replication_queue
            SET status = 'completed', completed_at = ?, processed_at = ?,
                bytes_replicated = ?, last_error = ''
            WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(bytes_replicated)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal failure: attempts exhausted.
    pub async fn mark_failed(&self, id: i64, error: &str) -> ReplicationResult<()> {
        sqlx::query(
            r"UPDATE replication_queue
            SET status = 'failed', last_error = ?, processed_at = ?
            WHERE id = ?",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Retriable failure: back to `pending` for the loader to re-surface.
    pub async fn requeue_pending(&self, id: i64, error: &str) -> ReplicationResult<()> {
        sqlx::query(
            r"UPDATE replication_queue
            SET status = 'pending', last_error = ?, processed_at = ?
            WHERE id = ?",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one queue row by id.
    pub async fn get_queue_item(&self, id: i64) -> ReplicationResult<Option<QueueItem>> {
        let row = sqlx::query("SELECT * FROM replication_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| item_from_row(&row)).transpose()
    }

    /// All queue rows for a rule, oldest first. Intended for inspection.
    pub async fn queue_items_for_rule(&self, rule_id: &str) -> ReplicationResult<Vec<QueueItem>> {
        let rows = sqlx::query(
            "SELECT * FROM replication_queue WHERE rule_id = ? ORDER BY id ASC",
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Drop every queue row of a bucket (the bucket owns its rows).
    pub async fn delete_queue_for_bucket(
        &self,
        tenant_id: &str,
        bucket: &str,
    ) -> ReplicationResult<u64> {
        let result = sqlx::query(
            "DELETE FROM replication_queue WHERE tenant_id = ? AND bucket = ?",
        )
        .bind(tenant_id)
        .bind(bucket)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Reap terminal rows whose terminal timestamp precedes `cutoff`.
    ///
    /// Failed rows never set `completed_at`, so their `processed_at` is the
    /// terminal timestamp.
    pub async fn cleanup_terminal(&self, cutoff: DateTime<Utc>) -> ReplicationResult<u64> {
        let result = sqlx::query(
            r"DELETE FROM replication_queue
            WHERE status IN ('completed', 'failed')
              AND COALESCE(completed_at, processed_at) < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            debug!(reaped, "reaped terminal queue rows");
        }
        Ok(reaped)
    }

    /// Aggregate queue counters for one rule.
    pub async fn rule_metrics(&self, rule_id: &str) -> ReplicationResult<RuleMetrics> {
        let row = sqlx::query(
            r"SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END), 0) AS in_progress,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(bytes_replicated), 0) AS bytes
            FROM replication_queue WHERE rule_id = ?",
        )
        .bind(rule_id)
        .fetch_one(&self.pool)
        .await?;

        let last_error: Option<String> = sqlx::query(
            r"SELECT last_error FROM replication_queue
            WHERE rule_id = ? AND last_error != ''
            ORDER BY processed_at DESC LIMIT 1",
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.try_get("last_error"))
        .transpose()?;

        Ok(RuleMetrics {
            total_objects: row.try_get("total")?,
            pending_objects: row.try_get("pending")?,
            in_progress_objects: row.try_get("in_progress")?,
            completed_objects: row.try_get("completed")?,
            failed_objects: row.try_get("failed")?,
            bytes_replicated: row.try_get("bytes")?,
            last_error,
        })
    }

    // -----------------------------------------------------------------------
    // Status records
    // -----------------------------------------------------------------------

    /// Record the most recent outcome for `(rule, key, version)`.
    pub async fn upsert_status(&self, record: &StatusRecord) -> ReplicationResult<()> {
        sqlx::query(
            r"INSERT INTO replication_status (
                rule_id, tenant_id, source_bucket, source_key, source_version_id,
                destination_bucket, destination_key, status, last_attempt,
                replicated_at, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (rule_id, source_bucket, source_key, source_version_id)
            DO UPDATE SET
                destination_bucket = excluded.destination_bucket,
                destination_key = excluded.destination_key,
                status = excluded.status,
                last_attempt = excluded.last_attempt,
                replicated_at = excluded.replicated_at,
                error_message = excluded.error_message",
        )
        .bind(&record.rule_id)
        .bind(&record.tenant_id)
        .bind(&record.source_bucket)
        .bind(&record.source_key)
        .bind(&record.source_version_id)
        .bind(&record.destination_bucket)
        .bind(&record.destination_key)
        .bind(record.status.as_str())
        .bind(record.last_attempt)
        .bind(record.replicated_at)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch the most recent outcome for `(rule, key, version)`.
    pub async fn get_status(
        &self,
        rule_id: &str,
        source_bucket: &str,
        source_key: &str,
        source_version_id: &str,
    ) -> ReplicationResult<Option<StatusRecord>> {
        let row = sqlx::query(
            r"SELECT * FROM replication_status
            WHERE rule_id = ? AND source_bucket = ? AND source_key = ?
              AND source_version_id = ?",
        )
        .bind(rule_id)
        .bind(source_bucket)
        .bind(source_key)
        .bind(source_version_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| status_from_row(&row)).transpose()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn rule_from_row(row: &SqliteRow) -> ReplicationResult<ReplicationRule> {
    let mode: String = row.try_get("mode")?;
    let conflict_resolution: String = row.try_get("conflict_resolution")?;

    Ok(ReplicationRule {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        source_bucket: row.try_get("source_bucket")?,
        destination_endpoint: row.try_get("destination_endpoint")?,
        destination_bucket: row.try_get("destination_bucket")?,
        destination_access_key: row.try_get("destination_access_key")?,
        destination_secret_key: row.try_get("destination_secret_key")?,
        destination_region: row.try_get("destination_region")?,
        prefix: row.try_get("prefix")?,
        enabled: row.try_get("enabled")?,
        priority: row.try_get("priority")?,
        mode: mode.parse()?,
        schedule_interval: row.try_get("schedule_interval")?,
        conflict_resolution: conflict_resolution.parse()?,
        replicate_deletes: row.try_get("replicate_deletes")?,
        replicate_metadata: row.try_get("replicate_metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: &SqliteRow) -> ReplicationResult<QueueItem> {
    let action: String = row.try_get("action")?;
    let status: String = row.try_get("status")?;

    Ok(QueueItem {
        id: row.try_get("id")?,
        rule_id: row.try_get("rule_id")?,
        tenant_id: row.try_get("tenant_id")?,
        bucket: row.try_get("bucket")?,
        object_key: row.try_get("object_key")?,
        version_id: row.try_get("version_id")?,
        action: action.parse()?,
        status: status.parse()?,
        attempts: row.try_get("attempts")?,
        max_retries: row.try_get("max_retries")?,
        last_error: row.try_get("last_error")?,
        scheduled_at: row.try_get("scheduled_at")?,
        processed_at: row.try_get("processed_at")?,
        completed_at: row.try_get("completed_at")?,
        bytes_replicated: row.try_get("bytes_replicated")?,
    })
}

fn status_from_row(row: &SqliteRow) -> ReplicationResult<StatusRecord> {
    let status: String = row.try_get("status")?;

    Ok(StatusRecord {
        rule_id: row.try_get("rule_id")?,
        tenant_id: row.try_get("tenant_id")?,
        source_bucket: row.try_get("source_bucket")?,
        source_key: row.try_get("source_key")?,
        source_version_id: row.try_get("source_version_id")?,
        destination_bucket: row.try_get("destination_bucket")?,
        destination_key: row.try_get("destination_key")?,
        status: status.parse()?,
        last_attempt: row.try_get("last_attempt")?,
        replicated_at: row.try_get("replicated_at")?,
        error_message: row.try_get("error_message")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
