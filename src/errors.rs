//! Storage error types.
//!
//! Every variant maps to a stable, machine-readable code so callers (and
//! the CLI) can branch on the failure kind without matching on message
//! text.  GCS HTTP failures are folded into these variants by
//! [`StorageError::from_gcs_response`].

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The service-account key could not be read or is malformed.
    #[error("failed to load service account credentials from {path}: {message}")]
    Credentials { path: String, message: String },

    /// An OAuth2 access token could not be obtained.
    #[error("failed to obtain access token: {0}")]
    Token(String),

    /// The specified bucket does not exist.
    #[error("bucket {bucket} does not exist")]
    NoSuchBucket { bucket: String },

    /// The specified object does not exist.
    #[error("object {object} does not exist in bucket {bucket}")]
    NoSuchObject { bucket: String, object: String },

    /// A bucket with the requested name already exists.
    #[error("bucket {bucket} already exists")]
    BucketAlreadyExists { bucket: String },

    /// The bucket name violates GCS naming rules.
    #[error("invalid bucket name {name:?}: {reason}")]
    InvalidBucketName { name: String, reason: String },

    /// The local path cannot be turned into an object name.
    #[error("cannot derive an object name from path {path}")]
    InvalidObjectPath { path: String },

    /// The caller is not authorized for the operation.
    #[error("access denied: {message}")]
    AccessDenied { message: String },

    /// Transferred bytes do not match the checksum GCS reported.
    #[error("checksum mismatch for {object}: expected md5 {expected}, got {actual}")]
    ChecksumMismatch {
        object: String,
        expected: String,
        actual: String,
    },

    /// The signed URL expiry is outside the allowed window.
    #[error("invalid signed URL expiry: {0}")]
    InvalidExpiry(String),

    /// RSA signing failed.
    #[error("failed to sign: {0}")]
    Signing(String),

    /// Configuration could not be loaded or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Any other non-success response from the GCS JSON API.
    #[error("GCS {context} failed (HTTP {status}): {message}")]
    Api {
        context: String,
        status: u16,
        message: String,
    },

    /// Transport-level HTTP failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Local filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct GcsErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsErrorResponse {
    error: Option<GcsErrorDetail>,
}

impl StorageError {
    /// Return a stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Credentials { .. } => "Credentials",
            StorageError::Token(_) => "Token",
            StorageError::NoSuchBucket { .. } => "NoSuchBucket",
            StorageError::NoSuchObject { .. } => "NoSuchObject",
            StorageError::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            StorageError::InvalidBucketName { .. } => "InvalidBucketName",
            StorageError::InvalidObjectPath { .. } => "InvalidObjectPath",
            StorageError::AccessDenied { .. } => "AccessDenied",
            StorageError::ChecksumMismatch { .. } => "ChecksumMismatch",
            StorageError::InvalidExpiry(_) => "InvalidExpiry",
            StorageError::Signing(_) => "Signing",
            StorageError::Config(_) => "Config",
            StorageError::Api { .. } => "Api",
            StorageError::Http(_) => "Http",
            StorageError::Io(_) => "Io",
        }
    }

    /// Whether this error means the bucket or object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NoSuchBucket { .. } | StorageError::NoSuchObject { .. }
        )
    }

    /// Map a non-success GCS response to an error.
    ///
    /// 404 is not handled here: only the caller knows whether a bucket
    /// or an object was missing.
    pub fn from_gcs_response(context: &str, status: StatusCode, body: &str) -> Self {
        let message = match serde_json::from_str::<GcsErrorResponse>(body) {
            Ok(GcsErrorResponse {
                error: Some(detail),
            }) => detail.message.unwrap_or_else(|| body.to_string()),
            _ => body.to_string(),
        };

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                StorageError::AccessDenied { message }
            }
            _ => StorageError::Api {
                context: context.to_string(),
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl From<garde::Report> for StorageError {
    fn from(report: garde::Report) -> Self {
        StorageError::Config(report.to_string())
    }
}
