//! Error types for the core adapter contracts.

/// Error produced by the metadata store, object store, and source adapters.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The requested key does not exist in the store.
    #[error("key not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store reported a failure.
    #[error("storage backend failure: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_format_not_found() {
        let err = CoreError::NotFound {
            key: "bucket:t1:photos".to_owned(),
        };
        assert_eq!(err.to_string(), "key not found: bucket:t1:photos");
    }

    #[test]
    fn test_should_convert_serde_error() {
        let serde_err = serde_json::from_str::<u32>("not-a-number").unwrap_err();
        let err = CoreError::from(serde_err);
        assert!(matches!(err, CoreError::Serialization(_)));
    }

    #[test]
    fn test_should_convert_anyhow_error() {
        let err = CoreError::from(anyhow::anyhow!("disk I/O failure"));
        assert!(err.to_string().contains("disk I/O failure"));
    }
}
