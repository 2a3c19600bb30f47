//! Policy evaluation scenarios over the bucket manager.

#[cfg(test)]
mod tests {
    use maxiofs_policy::{AccessRequest, Decision, evaluate, parse_policy};

    use crate::TestCluster;

    /// Public read on the whole bucket, explicit deny for `u1` under
    /// `secret/`.
    const GATED_POLICY: &str = r#"{
        "Version": "2012-10-17",
        "Statement": [
            {"Effect": "Allow", "Principal": "*",
             "Action": "s3:GetObject", "Resource": "arn:aws:s3:::b/*"},
            {"Effect": "Deny", "Principal": {"AWS": "u1"},
             "Action": "s3:GetObject", "Resource": "arn:aws:s3:::b/secret/*"}
        ]
    }"#;

    #[tokio::test]
    async fn test_should_deny_secret_prefix_for_denied_principal() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "b", None).await.unwrap();
        cluster.manager.set_policy("t1", "b", GATED_POLICY).await.unwrap();

        let denied = cluster
            .manager
            .evaluate_policy(
                "t1",
                "b",
                &AccessRequest {
                    principal: "u1",
                    action: "s3:GetObject",
                    resource: "arn:aws:s3:::b/secret/x",
                    bucket: "b",
                },
            )
            .await
            .unwrap();
        assert_eq!(denied, Decision::ExplicitDeny);

        let allowed = cluster
            .manager
            .evaluate_policy(
                "t1",
                "b",
                &AccessRequest {
                    principal: "u1",
                    action: "s3:GetObject",
                    resource: "arn:aws:s3:::b/public/x",
                    bucket: "b",
                },
            )
            .await
            .unwrap();
        assert_eq!(allowed, Decision::Allow);
    }

    #[tokio::test]
    async fn test_should_deny_implicitly_without_policy() {
        let cluster = TestCluster::new().await;
        cluster.manager.create_bucket("t1", "b", None).await.unwrap();

        let decision = cluster
            .manager
            .evaluate_policy(
                "t1",
                "b",
                &AccessRequest {
                    principal: "anyone",
                    action: "s3:GetObject",
                    resource: "b/k",
                    bucket: "b",
                },
            )
            .await
            .unwrap();
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn test_should_be_stable_across_repeated_evaluations() {
        let doc = parse_policy(GATED_POLICY).unwrap();
        let request = AccessRequest {
            principal: "u1",
            action: "s3:GetObject",
            resource: "arn:aws:s3:::b/secret/x",
            bucket: "b",
        };

        let first = evaluate(Some(&doc), &request);
        for _ in 0..25 {
            assert_eq!(evaluate(Some(&doc), &request), first);
        }
        assert_eq!(first, Decision::ExplicitDeny);
    }

    #[test]
    fn test_should_normalize_short_form_grants_to_arn_requests() {
        // Short-form resource in the policy, ARN-form resource in the
        // request: same decision.
        let doc = parse_policy(
            r#"{"Statement": [{
                "Effect": "Allow", "Principal": "*",
                "Action": "s3:GetObject", "Resource": "B/*"
            }]}"#,
        )
        .unwrap();

        for key in ["k", "deep/nested/key", "trailing/slash/x"] {
            let resource = format!("arn:aws:s3:::B/{key}");
            let request = AccessRequest {
                principal: "anyone",
                action: "s3:GetObject",
                resource: &resource,
                bucket: "B",
            };
            assert_eq!(evaluate(Some(&doc), &request), Decision::Allow, "key {key}");
        }
    }
}
