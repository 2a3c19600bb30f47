//! End-to-end replication scenarios.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use maxiofs_replication::{
        NewRule, QueueAction, QueueStatus, ReplicationError, ReplicationMode, ReplicationConfig,
    };

    use crate::{TestCluster, md5_hex};

    fn realtime_rule(replicate_deletes: bool) -> NewRule {
        NewRule::builder()
            .tenant_id("t1")
            .source_bucket("src")
            .destination_endpoint("https://dst.example.com:9000")
            .destination_bucket("dst")
            .destination_access_key("AK")
            .destination_secret_key("SK")
            .replicate_deletes(replicate_deletes)
            .build()
    }

    #[tokio::test]
    async fn test_should_replicate_four_objects_with_identical_bytes() {
        let cluster = TestCluster::new().await;
        cluster
            .manager
            .create_bucket("t1", "src", None)
            .await
            .unwrap_or_else(|e| panic!("create bucket failed: {e}"));
        let rule = cluster
            .engine
            .create_rule(realtime_rule(false))
            .await
            .unwrap_or_else(|e| panic!("create rule failed: {e}"));

        let large = vec![b'X'; 10_000];
        let seeds: Vec<(&str, &[u8])> = vec![
            ("file1.txt", b"This is file 1 content"),
            ("file2.txt", b"This is file 2 content"),
            ("dir/file3.txt", b"This is file 3 in directory"),
            ("large.bin", large.as_slice()),
        ];

        cluster.engine.start().await;
        for (key, data) in &seeds {
            cluster.upload("t1", "src", key, data).await;
        }

        let metrics = cluster.wait_for_completed(&rule.id, 4).await;
        cluster.engine.stop().await;

        assert_eq!(metrics.completed_objects, 4);
        assert_eq!(metrics.failed_objects, 0);
        assert!(metrics.bytes_replicated > 0);

        for (key, data) in &seeds {
            let object = cluster
                .destination
                .object("dst", key)
                .unwrap_or_else(|| panic!("destination missing {key}"));
            assert_eq!(object.data.as_ref(), *data, "bytes differ for {key}");
            assert_eq!(
                md5_hex(&object.data),
                md5_hex(data),
                "MD5 differs for {key}"
            );
        }
    }

    #[tokio::test]
    async fn test_should_retry_until_success_with_three_total_attempts() {
        let config = ReplicationConfig::builder()
            .worker_count(1)
            .queue_size(16)
            .batch_size(8)
            .retry_interval_secs(0)
            .max_retries(5)
            .load_interval_secs(1)
            .build();
        let cluster = TestCluster::with_config(config).await;
        cluster.manager.create_bucket("t1", "src", None).await.unwrap();
        let rule = cluster.engine.create_rule(realtime_rule(true)).await.unwrap();

        cluster.destination.fail_puts(2);
        cluster.engine.start().await;
        cluster.upload("t1", "src", "retry-test.txt", b"test content").await;

        cluster.wait_for_completed(&rule.id, 1).await;
        cluster.engine.stop().await;

        let object = cluster
            .destination
            .object("dst", "retry-test.txt")
            .unwrap_or_else(|| panic!("destination missing retry-test.txt"));
        assert_eq!(object.data.as_ref(), b"test content");

        // Two transient failures plus the final success.
        assert_eq!(cluster.destination.put_calls(), 3);
        let rows = cluster
            .engine
            .store()
            .queue_items_for_rule(&rule.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attempts, 3);
        assert_eq!(rows[0].status, QueueStatus::Completed);
    }

    #[tokio::test]
    async fn test_should_fail_permanently_after_exhausting_attempts() {
        let config = ReplicationConfig::builder()
            .worker_count(1)
            .queue_size(16)
            .batch_size(8)
            .retry_interval_secs(0)
            .max_retries(2)
            .load_interval_secs(1)
            .build();
        let cluster = TestCluster::with_config(config).await;
        cluster.manager.create_bucket("t1", "src", None).await.unwrap();
        let rule = cluster.engine.create_rule(realtime_rule(true)).await.unwrap();

        cluster.destination.fail_puts(usize::MAX);
        cluster.engine.start().await;
        cluster.upload("t1", "src", "doomed.txt", b"never arrives").await;

        // Poll for the terminal failure.
        let mut failed = 0;
        for _ in 0..100 {
            failed = cluster
                .engine
                .get_metrics(&rule.id)
                .await
                .unwrap()
                .failed_objects;
            if failed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cluster.engine.stop().await;

        assert_eq!(failed, 1);
        let rows = cluster
            .engine
            .store()
            .queue_items_for_rule(&rule.id)
            .await
            .unwrap();
        assert_eq!(rows[0].status, QueueStatus::Failed);
        assert_eq!(rows[0].attempts, 2);
        assert!(rows[0].last_error.contains("injected put failure"));
        assert!(cluster.destination.object("dst", "doomed.txt").is_none());

        // The failure is observable through the status record too.
        let status = cluster
            .engine
            .get_status(&rule.id, "src", "doomed.txt", "")
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("status record missing"));
        assert_eq!(status.status, QueueStatus::Failed);
    }

    #[tokio::test]
    async fn test_should_sync_scheduled_rule_on_demand() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "src", None).await.unwrap();
        let rule = cluster
            .engine
            .create_rule(
                NewRule::builder()
                    .tenant_id("t1")
                    .source_bucket("src")
                    .destination_endpoint("https://dst.example.com:9000")
                    .destination_bucket("dst")
                    .destination_access_key("AK")
                    .destination_secret_key("SK")
                    .mode(ReplicationMode::Scheduled)
                    .schedule_interval(1)
                    .build(),
            )
            .await
            .unwrap();

        cluster.write_object("t1", "src", "scheduled1.txt", b"first").await;
        cluster.write_object("t1", "src", "scheduled2.txt", b"second").await;

        let queued = cluster
            .engine
            .sync_rule(&rule.id)
            .await
            .unwrap_or_else(|e| panic!("sync failed: {e}"));
        assert_eq!(queued, 2);

        cluster.engine.start().await;
        cluster.wait_for_completed(&rule.id, 2).await;
        cluster.engine.stop().await;

        assert_eq!(
            cluster
                .destination
                .object("dst", "scheduled1.txt")
                .unwrap()
                .data
                .as_ref(),
            b"first"
        );
        assert_eq!(
            cluster
                .destination
                .object("dst", "scheduled2.txt")
                .unwrap()
                .data
                .as_ref(),
            b"second"
        );
    }

    #[tokio::test]
    async fn test_should_reject_overlapping_sync_of_one_rule() {
        let (cluster, gate) = TestCluster::with_gated_source().await;
        cluster.manager.create_bucket("t1", "src", None).await.unwrap();
        let rule = cluster.engine.create_rule(realtime_rule(true)).await.unwrap();
        cluster.write_object("t1", "src", "held.txt", b"x").await;

        // First sync blocks inside the source listing.
        let engine = cluster.engine.clone();
        let rule_id = rule.id.clone();
        let first = tokio::spawn(async move { engine.sync_rule(&rule_id).await });
        gate.wait_entered().await;

        // Overlapping sync for the same rule is refused, not queued.
        let second = cluster.engine.sync_rule(&rule.id).await;
        assert!(
            matches!(second, Err(ReplicationError::SyncInProgress { .. })),
            "expected SyncInProgress, got {second:?}"
        );

        gate.open();
        let queued = first
            .await
            .unwrap_or_else(|e| panic!("task panicked: {e}"))
            .unwrap_or_else(|e| panic!("first sync failed: {e}"));
        assert_eq!(queued, 1);
    }

    #[tokio::test]
    async fn test_should_keep_destination_key_equal_to_source_key() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "src", None).await.unwrap();
        let rule = cluster
            .engine
            .create_rule(
                NewRule::builder()
                    .tenant_id("t1")
                    .source_bucket("src")
                    .destination_endpoint("https://dst.example.com:9000")
                    .destination_bucket("dst")
                    .destination_access_key("AK")
                    .destination_secret_key("SK")
                    .prefix("deep/")
                    .build(),
            )
            .await
            .unwrap();

        cluster.engine.start().await;
        cluster
            .upload("t1", "src", "deep/nested/path/object.bin", b"payload")
            .await;
        cluster.wait_for_completed(&rule.id, 1).await;
        cluster.engine.stop().await;

        // Byte-for-byte key equality: the rule prefix is never stripped.
        assert!(
            cluster
                .destination
                .object("dst", "deep/nested/path/object.bin")
                .is_some()
        );
        assert!(cluster.destination.object("dst", "nested/path/object.bin").is_none());
    }

    #[tokio::test]
    async fn test_should_only_queue_keys_matching_rule_prefix() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "src", None).await.unwrap();
        let rule = cluster
            .engine
            .create_rule(
                NewRule::builder()
                    .tenant_id("t1")
                    .source_bucket("src")
                    .destination_endpoint("https://dst.example.com:9000")
                    .destination_bucket("dst")
                    .destination_access_key("AK")
                    .destination_secret_key("SK")
                    .prefix("logs/")
                    .build(),
            )
            .await
            .unwrap();

        cluster.write_object("t1", "src", "logs/app.log", b"in scope").await;
        cluster.write_object("t1", "src", "data/raw.bin", b"out of scope").await;

        let matched = cluster
            .engine
            .queue_object("t1", "src", "logs/app.log", QueueAction::Put)
            .await
            .unwrap();
        let skipped = cluster
            .engine
            .queue_object("t1", "src", "data/raw.bin", QueueAction::Put)
            .await
            .unwrap();

        assert_eq!(matched, 1);
        assert_eq!(skipped, 0);
        let metrics = cluster.engine.get_metrics(&rule.id).await.unwrap();
        assert_eq!(metrics.total_objects, 1);
    }

    #[tokio::test]
    async fn test_should_drop_queue_rows_when_bucket_is_deleted() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "src", None).await.unwrap();
        let rule = cluster.engine.create_rule(realtime_rule(true)).await.unwrap();

        // Engine stopped: the row stays pending.
        cluster.upload("t1", "src", "stranded.txt", b"x").await;
        assert_eq!(
            cluster.engine.get_metrics(&rule.id).await.unwrap().pending_objects,
            1
        );

        // Deleting the bucket drops its queue rows (the bucket owns them).
        cluster
            .manager
            .force_delete_bucket("t1", "src")
            .await
            .unwrap_or_else(|e| panic!("force delete failed: {e}"));
        cluster
            .engine
            .store()
            .delete_queue_for_bucket("t1", "src")
            .await
            .unwrap_or_else(|e| panic!("queue cascade failed: {e}"));

        assert_eq!(
            cluster.engine.get_metrics(&rule.id).await.unwrap().total_objects,
            0
        );
    }

    #[tokio::test]
    async fn test_should_skip_delete_replication_when_disabled() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "src", None).await.unwrap();
        let rule = cluster.engine.create_rule(realtime_rule(false)).await.unwrap();

        cluster.engine.start().await;
        cluster.upload("t1", "src", "keep-remote.txt", b"payload").await;
        cluster.wait_for_completed(&rule.id, 1).await;

        // A delete event completes as a no-op and the remote copy stays.
        cluster
            .engine
            .queue_object("t1", "src", "keep-remote.txt", QueueAction::Delete)
            .await
            .unwrap();
        cluster.wait_for_completed(&rule.id, 2).await;
        cluster.engine.stop().await;

        assert!(cluster.destination.object("dst", "keep-remote.txt").is_some());
    }
}
