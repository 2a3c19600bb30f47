//! Bucket manager configuration.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Configuration for the bucket metadata manager and its reconciler.
///
/// # Examples
///
/// ```
/// use maxiofs_bucket::config::BucketConfig;
///
/// let config = BucketConfig::default();
/// assert_eq!(config.default_region, "us-east-1");
/// assert_eq!(config.reconcile_interval_secs, 900);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
    /// Region recorded on buckets created without an explicit region.
    #[builder(default = String::from("us-east-1"))]
    pub default_region: String,

    /// Cadence of the background metrics reconciler, in seconds.
    #[builder(default = 900)]
    pub reconcile_interval_secs: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            default_region: String::from("us-east-1"),
            reconcile_interval_secs: 900,
        }
    }
}

impl BucketConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `MAXIOFS_DEFAULT_REGION` | `us-east-1` |
    /// | `MAXIOFS_RECONCILE_INTERVAL_SECS` | `900` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("MAXIOFS_DEFAULT_REGION") {
            config.default_region = v;
        }
        if let Ok(v) = std::env::var("MAXIOFS_RECONCILE_INTERVAL_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                config.reconcile_interval_secs = n;
            }
        }

        config
    }
}
