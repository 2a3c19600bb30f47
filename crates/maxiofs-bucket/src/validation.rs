//! Bucket name validation.
//!
//! Names are validated against the MaxIOFS subset of the
//! [Amazon S3 rules](https://docs.aws.amazon.com/AmazonS3/latest/userguide/bucketnamingrules.html):
//! lowercase alphanumerics and single dashes, 3-63 characters, no IPv4
//! literals, no `xn--` prefix, no `-s3alias` suffix.

use std::net::Ipv4Addr;

use crate::error::BucketError;

/// Minimum bucket name length.
const MIN_BUCKET_NAME_LEN: usize = 3;

/// Maximum bucket name length.
const MAX_BUCKET_NAME_LEN: usize = 63;

/// Validate a bucket name.
///
/// Rules:
/// - 3-63 characters long
/// - Only lowercase letters, numbers, and dashes
/// - Must start and end with a letter or number
/// - No consecutive dashes (`--`)
/// - Not formatted as an IPv4 address (e.g. `192.168.0.1`)
/// - Must not start with `xn--`
/// - Must not end with `-s3alias`
///
/// # Errors
///
/// Returns [`BucketError::InvalidBucketName`] if any rule is violated.
///
/// # Examples
///
/// ```
/// use maxiofs_bucket::validation::validate_bucket_name;
///
/// assert!(validate_bucket_name("my-bucket").is_ok());
/// assert!(validate_bucket_name("MyBucket").is_err());
/// ```
pub fn validate_bucket_name(name: &str) -> Result<(), BucketError> {
    let len = name.len();

    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&len) {
        return Err(invalid(
            name,
            format!(
                "bucket name must be between {MIN_BUCKET_NAME_LEN} and {MAX_BUCKET_NAME_LEN} characters long"
            ),
        ));
    }

    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(invalid(
            name,
            "bucket name must only contain lowercase letters, numbers, and dashes".to_owned(),
        ));
    }

    let first = name.as_bytes()[0];
    let last = name.as_bytes()[len - 1];
    if first == b'-' || last == b'-' {
        return Err(invalid(
            name,
            "bucket name must start and end with a letter or number".to_owned(),
        ));
    }

    if name.contains("--") {
        return Err(invalid(
            name,
            "bucket name must not contain consecutive dashes".to_owned(),
        ));
    }

    if name.parse::<Ipv4Addr>().is_ok() {
        return Err(invalid(
            name,
            "bucket name must not be formatted as an IP address".to_owned(),
        ));
    }

    if name.starts_with("xn--") {
        return Err(invalid(
            name,
            "bucket name must not start with 'xn--'".to_owned(),
        ));
    }

    if name.ends_with("-s3alias") {
        return Err(invalid(
            name,
            "bucket name must not end with '-s3alias'".to_owned(),
        ));
    }

    Ok(())
}

fn invalid(name: &str, reason: String) -> BucketError {
    BucketError::InvalidBucketName {
        name: name.to_owned(),
        reason,
    }
}
