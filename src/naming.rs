//! Bucket and object naming rules.

use std::path::Path;

use crate::errors::{Result, StorageError};

fn invalid(name: &str, reason: &str) -> StorageError {
    StorageError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Validate that a bucket name conforms to GCS naming rules.
///
/// Rules:
/// - 3-63 characters, or up to 222 if it contains dots (each
///   dot-separated component at most 63)
/// - Only lowercase letters, numbers, hyphens, underscores and periods
/// - Must begin and end with a letter or number
/// - Cannot be formatted as an IP address (e.g., 192.168.5.4)
/// - Must not start with `goog` or contain `google`
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let len = name.len();
    let dotted = name.contains('.');
    let max = if dotted { 222 } else { 63 };

    if len < 3 || len > max {
        return Err(invalid(name, &format!("length must be between 3 and {max}")));
    }
    if dotted && name.split('.').any(|part| part.len() > 63) {
        return Err(invalid(name, "dot-separated components must be at most 63 characters"));
    }

    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '-' | '_' | '.'))
    {
        return Err(invalid(
            name,
            "only lowercase letters, digits, '-', '_' and '.' are allowed",
        ));
    }

    let starts_ok = name.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit());
    let ends_ok = name.ends_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !starts_ok || !ends_ok {
        return Err(invalid(name, "must start and end with a letter or digit"));
    }

    if looks_like_ip(name) {
        return Err(invalid(name, "must not be an IP address"));
    }

    if name.starts_with("goog") || name.contains("google") {
        return Err(invalid(name, "must not start with \"goog\" or contain \"google\""));
    }

    Ok(())
}

fn looks_like_ip(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| p.parse::<u8>().is_ok())
}

/// Object name an uploaded file is stored under: its final path component.
pub fn object_name_for_path(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| StorageError::InvalidObjectPath {
            path: path.display().to_string(),
        })
}
