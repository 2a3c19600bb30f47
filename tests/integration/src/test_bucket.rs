//! Bucket lifecycle and metric scenarios.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use bytes::Bytes;

    use maxiofs_bucket::BucketError;
    use maxiofs_core::ObjectStore;
    use maxiofs_core::types::ObjectRecord;

    use crate::TestCluster;

    #[tokio::test]
    async fn test_should_apply_bucket_name_rules() {
        let cluster = TestCluster::new().await;

        for name in [
            "ab",
            "my--bucket",
            "192.168.1.1",
            "xn--bucket",
            "bucket-s3alias",
            "MyBucket",
        ] {
            let result = cluster.manager.create_bucket("t1", name, None).await;
            assert!(
                matches!(result, Err(BucketError::InvalidBucketName { .. })),
                "expected rejection for {name}, got {result:?}"
            );
        }

        let longest = "a".repeat(63);
        for name in ["abc", "my-bucket", longest.as_str()] {
            cluster
                .manager
                .create_bucket("t1", name, None)
                .await
                .unwrap_or_else(|e| panic!("expected acceptance for {name}: {e}"));
        }
    }

    #[tokio::test]
    async fn test_should_refuse_delete_of_bucket_with_live_object() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "b", None).await.unwrap();
        cluster.write_object("t1", "b", "live.txt", b"still here").await;

        let result = cluster.manager.delete_bucket("t1", "b").await;
        assert!(matches!(result, Err(BucketError::BucketNotEmpty { .. })));

        // The descriptor is intact after the refused delete.
        let info = cluster.manager.get_bucket_info("t1", "b").await.unwrap();
        assert_eq!(info.name, "b");
        assert_eq!(info.metrics.object_count, 1);
    }

    #[tokio::test]
    async fn test_should_clean_orphans_and_delete_bucket() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "dusty", None).await.unwrap();

        // Orphaned payload: physical file with no metadata record.
        cluster
            .objects
            .put_object(
                "t1/dusty/orphan.bin",
                Bytes::from_static(b"stale"),
                None,
                &HashMap::new(),
            )
            .await
            .unwrap();

        // Logically deleted payload: record is a delete marker.
        cluster
            .objects
            .put_object(
                "t1/dusty/gone.txt",
                Bytes::from_static(b"stale"),
                None,
                &HashMap::new(),
            )
            .await
            .unwrap();
        cluster
            .manager
            .put_object_record("t1", "dusty", &ObjectRecord::delete_marker("gone.txt"))
            .await
            .unwrap();

        cluster
            .manager
            .delete_bucket("t1", "dusty")
            .await
            .unwrap_or_else(|e| panic!("delete should succeed after cleanup: {e}"));

        assert!(
            cluster.objects.is_empty(),
            "orphans and the marker must be gone"
        );
        assert!(matches!(
            cluster.manager.get_bucket_info("t1", "dusty").await,
            Err(BucketError::BucketNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_sum_concurrent_metric_deltas_exactly() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "hot", None).await.unwrap();

        let manager = Arc::clone(&cluster.manager);
        let mut handles = Vec::new();
        for _ in 0..40 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.increment_object_count("t1", "hot", 128).await
            }));
        }
        for _ in 0..15 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.decrement_object_count("t1", "hot", 128).await
            }));
        }
        for handle in handles {
            handle
                .await
                .unwrap_or_else(|e| panic!("task panicked: {e}"))
                .unwrap_or_else(|e| panic!("metric update failed: {e}"));
        }

        let info = cluster.manager.get_bucket_info("t1", "hot").await.unwrap();
        assert_eq!(info.metrics.object_count, 25);
        assert_eq!(info.metrics.total_size, 25 * 128);
    }

    #[tokio::test]
    async fn test_should_agree_with_recalculated_metrics() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "checked", None).await.unwrap();

        cluster.write_object("t1", "checked", "a.bin", &[0u8; 100]).await;
        cluster.write_object("t1", "checked", "b.bin", &[0u8; 60]).await;

        let cached = cluster
            .manager
            .get_bucket_info("t1", "checked")
            .await
            .unwrap()
            .metrics;
        let rebuilt = cluster
            .manager
            .recalculate_metrics("t1", "checked")
            .await
            .unwrap();

        assert_eq!(cached, rebuilt);
        assert_eq!(rebuilt.object_count, 2);
        assert_eq!(rebuilt.total_size, 160);
    }

    #[tokio::test]
    async fn test_should_keep_global_names_unique_across_tenants() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "claimed", None).await.unwrap();

        let result = cluster.manager.create_bucket("t2", "claimed", None).await;
        assert!(matches!(
            result,
            Err(BucketError::BucketAlreadyExists { .. })
        ));
    }
}
