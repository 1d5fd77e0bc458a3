//! Snapshot naming rules.

use crate::error::{Result, TesseraError};
use chrono::{DateTime, Utc};

/// Longest accepted snapshot name.
pub const MAX_NAME_LEN: usize = 63;

/// Prefix of generated names.
pub const GENERATED_PREFIX: &str = "s";

/// Check a user-supplied snapshot name.
///
/// Names are 1 to 63 characters of lowercase ASCII letters, digits, `-` and
/// `.`, starting with a letter or digit.
pub fn validate_name(name: &str) -> Result<()> {
    match naming_violation(name) {
        Some(cause) => Err(TesseraError::InvalidSnapshotName {
            name: name.to_string(),
            cause,
        }),
        None => Ok(()),
    }
}

/// Check the volume and bucket names that prefix every table key.
///
/// Both follow the snapshot name rules, so neither can contain `/` and one
/// bucket's prefix never covers another bucket's keys.
pub fn validate_bucket_path(volume: &str, bucket: &str) -> Result<()> {
    let cause = naming_violation(volume)
        .map(|cause| format!("volume {cause}"))
        .or_else(|| naming_violation(bucket).map(|cause| format!("bucket {cause}")));
    match cause {
        Some(cause) => Err(TesseraError::InvalidBucketName {
            volume: volume.to_string(),
            bucket: bucket.to_string(),
            cause,
        }),
        None => Ok(()),
    }
}

fn naming_violation(name: &str) -> Option<String> {
    let Some(first) = name.chars().next() else {
        return Some("name is empty".to_string());
    };
    if name.len() > MAX_NAME_LEN {
        return Some("name is longer than 63 characters".to_string());
    }
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Some("name must start with a lowercase letter or digit".to_string());
    }
    name.chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.'))
        .map(|bad| format!("character '{bad}' is not allowed"))
}

/// Name derived from the leader's clock, e.g. `s20240115-103000.123`.
#[must_use]
pub fn generated_name(now: DateTime<Utc>) -> String {
    format!("{}{}", GENERATED_PREFIX, now.format("%Y%m%d-%H%M%S%.3f"))
}

/// First of `base`, `base-1`, `base-2`, ... that is not taken.
pub fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1u64..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
