//! The policy decision function.
//!
//! AWS semantics: an absent or empty policy denies implicitly; any matching
//! `Deny` statement wins immediately; otherwise a matching `Allow` grants;
//! otherwise the request is denied implicitly.

use tracing::trace;

use crate::document::{Effect, PolicyDocument, Principal, Statement};

/// ARN prefix for S3 resources.
const ARN_PREFIX: &str = "arn:aws:s3:::";

/// The request tuple evaluated against a policy.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    /// The caller's identity.
    pub principal: &'a str,
    /// The S3 action, e.g. `s3:GetObject`.
    pub action: &'a str,
    /// The target resource, ARN- or short-form.
    pub resource: &'a str,
    /// The bucket the request addresses (context for short-form resources).
    pub bucket: &'a str,
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A matching statement allows the request.
    Allow,
    /// No statement matched; implicit denial.
    Deny,
    /// A matching statement denies the request, overriding any Allow.
    ExplicitDeny,
}

/// Evaluate `request` against `policy`.
///
/// Pure and deterministic: the same inputs always produce the same
/// decision.
#[must_use]
pub fn evaluate(policy: Option<&PolicyDocument>, request: &AccessRequest<'_>) -> Decision {
    let Some(policy) = policy else {
        return Decision::Deny;
    };
    if policy.is_empty() {
        return Decision::Deny;
    }

    let mut allowed = false;
    for statement in &policy.statements {
        if !statement_matches(statement, request) {
            continue;
        }
        match statement.effect {
            // Deny always wins; stop at the first match.
            Effect::Deny => {
                trace!(sid = ?statement.sid, "explicit deny");
                return Decision::ExplicitDeny;
            }
            Effect::Allow => allowed = true,
        }
    }

    if allowed { Decision::Allow } else { Decision::Deny }
}

/// Whether all three matchers of a statement accept the request.
fn statement_matches(statement: &Statement, request: &AccessRequest<'_>) -> bool {
    principal_matches(statement.principal.as_ref(), request.principal)
        && statement
            .action
            .as_slice()
            .iter()
            .any(|pattern| action_matches(pattern, request.action))
        && statement
            .resource
            .as_slice()
            .iter()
            .any(|pattern| resource_matches(pattern, request.resource, request.bucket))
}

/// Principal matcher. `None` (legacy documents) matches everyone.
fn principal_matches(principal: Option<&Principal>, who: &str) -> bool {
    match principal {
        None => true,
        Some(Principal::Id(id)) => id == "*" || id == who,
        Some(Principal::Aws { aws }) => aws.as_slice().iter().any(|id| id == "*" || id == who),
        Some(Principal::CanonicalUser { canonical_user }) => {
            canonical_user == "*" || canonical_user == who
        }
    }
}

/// Action matcher: exact, global wildcards, or trailing-star prefix.
fn action_matches(pattern: &str, action: &str) -> bool {
    if pattern == "*" || pattern == "s3:*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return action.starts_with(prefix);
    }
    pattern == action
}

/// Resource matcher over ARN-normalized forms.
fn resource_matches(pattern: &str, resource: &str, bucket: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern = normalize_arn(pattern, bucket);
    let resource = normalize_arn(resource, bucket);

    if let Some(bucket_part) = pattern.strip_suffix("/*") {
        // Any key within the bucket (or key prefix), but not the bare bucket.
        return resource.strip_prefix(bucket_part).is_some_and(|rest| {
            rest.len() > 1 && rest.starts_with('/')
        });
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return resource.starts_with(prefix);
    }
    pattern == resource
}

/// Normalize a resource string to `arn:aws:s3:::<bucket>[/<key>]`.
///
/// Short forms (`bucket`, `bucket/key`, `bucket/*`) gain the ARN prefix; an
/// empty resource falls back to the request bucket.
fn normalize_arn(resource: &str, bucket: &str) -> String {
    if resource.starts_with(ARN_PREFIX) {
        return resource.to_owned();
    }
    if resource.is_empty() {
        return format!("{ARN_PREFIX}{bucket}");
    }
    format!("{ARN_PREFIX}{resource}")
}
