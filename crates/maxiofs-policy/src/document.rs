//! Policy document model with the AWS 2012-10-17 JSON surface.
//!
//! The wire format allows several shapes for the same field: principals may
//! be a wildcard string, an identity string, or an `{"AWS": ...}` /
//! `{"CanonicalUser": ...}` map; actions and resources may be a single
//! string or an array. Those sums are modeled as explicit tagged variants
//! ([`Principal`], [`ValueOrList`]) rather than raw JSON values, so the
//! evaluator never touches `serde_json::Value` except for the reserved
//! `Condition` block.

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

// ---------------------------------------------------------------------------
// ValueOrList
// ---------------------------------------------------------------------------

/// A field that may be written as a single value or an array of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueOrList<T> {
    /// A single bare value.
    One(T),
    /// An array of values (OR semantics).
    Many(Vec<T>),
}

impl<T> ValueOrList<T> {
    /// View the contained value(s) as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        }
    }
}

impl<T> From<T> for ValueOrList<T> {
    fn from(value: T) -> Self {
        Self::One(value)
    }
}

impl<T> From<Vec<T>> for ValueOrList<T> {
    fn from(values: Vec<T>) -> Self {
        Self::Many(values)
    }
}

// ---------------------------------------------------------------------------
// Effect / Principal
// ---------------------------------------------------------------------------

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// The statement grants the request.
    Allow,
    /// The statement denies the request (and overrides any Allow).
    Deny,
}

/// The principal clause of a statement.
///
/// An absent principal (legacy documents) matches every caller and is
/// represented as `None` on [`Statement::principal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    /// Bare string form: `"*"` or a single identity.
    Id(String),
    /// `{"AWS": "..."} ` or `{"AWS": ["...", ...]}`.
    Aws {
        /// The AWS principal value(s).
        #[serde(rename = "AWS")]
        aws: ValueOrList<String>,
    },
    /// `{"CanonicalUser": "..."}`.
    CanonicalUser {
        /// The canonical user identifier.
        #[serde(rename = "CanonicalUser")]
        canonical_user: String,
    },
}

// ---------------------------------------------------------------------------
// Statement / PolicyDocument
// ---------------------------------------------------------------------------

/// One statement of a policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// Optional statement identifier.
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Allow or Deny.
    #[serde(rename = "Effect")]
    pub effect: Effect,

    /// Who the statement applies to; absent means everyone.
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,

    /// Action pattern(s), wildcard-capable.
    #[serde(rename = "Action")]
    pub action: ValueOrList<String>,

    /// Resource pattern(s), ARN- or short-form, wildcard-capable.
    #[serde(rename = "Resource")]
    pub resource: ValueOrList<String>,

    /// Reserved condition block; parsed and retained, never evaluated.
    #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

/// A bucket policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Document version string; stored, not enforced.
    #[serde(rename = "Version", default = "default_version")]
    pub version: String,

    /// The statements, evaluated in order.
    #[serde(rename = "Statement")]
    pub statements: Vec<Statement>,
}

fn default_version() -> String {
    "2012-10-17".to_owned()
}

impl PolicyDocument {
    /// Whether the document carries no statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Parse a policy document from its JSON representation.
///
/// # Errors
///
/// Returns [`PolicyError::InvalidDocument`] on malformed JSON and
/// [`PolicyError::EmptyDocument`] when the document has no statements
/// (rejected at Set-time; an absent policy is expressed as `None`, never as
/// an empty document).
pub fn parse_policy(json: &str) -> Result<PolicyDocument, PolicyError> {
    let document: PolicyDocument = serde_json::from_str(json)?;
    if document.is_empty() {
        return Err(PolicyError::EmptyDocument);
    }
    Ok(document)
}
