//! Bucket policy evaluation for MaxIOFS.
//!
//! A pure decision function over AWS-compatible (2012-10-17) policy
//! documents: given a parsed [`PolicyDocument`] and an [`AccessRequest`],
//! [`evaluate`] returns [`Decision::Allow`], [`Decision::Deny`] (implicit),
//! or [`Decision::ExplicitDeny`]. No I/O happens anywhere in this crate.
//!
//! Deny always wins: the first matching `Deny` statement short-circuits the
//! evaluation regardless of how many statements allow the request.

pub mod document;
pub mod error;
pub mod eval;

pub use document::{Effect, PolicyDocument, Principal, Statement, ValueOrList, parse_policy};
pub use error::{PolicyError, PolicyResult};
pub use eval::{AccessRequest, Decision, evaluate};
