//! Policy parsing errors.

/// Error produced when a policy document cannot be parsed.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The document is not valid JSON for the policy schema.
    #[error("invalid policy document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    /// The document parsed but carries no statements.
    #[error("policy document has no statements")]
    EmptyDocument,
}

/// Convenience result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
