//! V4 signed URLs (`GOOG4-RSA-SHA256`).
//!
//! The algorithm mirrors the GCS V4 signing process:
//! 1. Build a canonical request (method, path, sorted query, host header)
//! 2. Build a string-to-sign over its SHA-256 digest and credential scope
//! 3. Sign with the service account's RSA key (RSA-SHA256)
//! 4. Append the hex signature as `X-Goog-Signature`

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::Algorithm;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::credentials::ServiceAccountKey;
use crate::errors::{Result, StorageError};

/// Signing algorithm identifier.
pub const ALGORITHM: &str = "GOOG4-RSA-SHA256";

/// Longest lifetime GCS accepts for a V4 signed URL (7 days).
pub const MAX_SIGNED_URL_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lifetime used when none is given (15 minutes).
pub const DEFAULT_SIGNED_URL_EXPIRY: Duration = Duration::from_secs(15 * 60);

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// HTTP method the signed URL authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignedUrlMethod {
    #[default]
    Get,
    Head,
    Put,
    Post,
    Delete,
}

impl SignedUrlMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignedUrlMethod::Get => "GET",
            SignedUrlMethod::Head => "HEAD",
            SignedUrlMethod::Put => "PUT",
            SignedUrlMethod::Post => "POST",
            SignedUrlMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SignedUrlMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignedUrlMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(SignedUrlMethod::Get),
            "HEAD" => Ok(SignedUrlMethod::Head),
            "PUT" => Ok(SignedUrlMethod::Put),
            "POST" => Ok(SignedUrlMethod::Post),
            "DELETE" => Ok(SignedUrlMethod::Delete),
            other => Err(format!("unsupported signed URL method: {other}")),
        }
    }
}

/// Options for [`sign_url`].
#[derive(Debug, Clone)]
pub struct SignedUrlOptions {
    pub method: SignedUrlMethod,
    pub expires: Duration,
}

impl Default for SignedUrlOptions {
    fn default() -> Self {
        Self {
            method: SignedUrlMethod::Get,
            expires: DEFAULT_SIGNED_URL_EXPIRY,
        }
    }
}

/// Validate a signed URL lifetime: non-zero and at most 7 days.
pub fn validate_expiry(expires: Duration) -> Result<()> {
    if expires.is_zero() {
        Err(StorageError::InvalidExpiry(
            "expiry must be greater than zero".to_string(),
        ))
    } else if expires > MAX_SIGNED_URL_EXPIRY {
        Err(StorageError::InvalidExpiry(format!(
            "expiry {expires:?} exceeds maximum {MAX_SIGNED_URL_EXPIRY:?}"
        )))
    } else {
        Ok(())
    }
}

// ── URI encoding ────────────────────────────────────────────────────

/// RFC 3986 percent-encoding.
///
/// - Characters A-Z, a-z, 0-9, -, _, ., ~ are NOT encoded.
/// - All other bytes are percent-encoded with uppercase hex.
/// - If `encode_slash` is false, `/` is kept (object paths).
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 2);
    for byte in input.bytes() {
        let ch = byte as char;
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~') {
            encoded.push(ch);
        } else if ch == '/' && !encode_slash {
            encoded.push('/');
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

// ── Canonical request construction ──────────────────────────────────

/// Build the canonical query string: names and values encoded, sorted by
/// name, joined with `&`.
pub fn build_canonical_query_string(params: &[(&str, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the canonical request string.
///
/// ```text
/// HTTP_VERB + '\n' +
/// PATH_TO_RESOURCE + '\n' +
/// CANONICAL_QUERY_STRING + '\n' +
/// CANONICAL_HEADERS + '\n' +
/// SIGNED_HEADERS + '\n' +
/// PAYLOAD
/// ```
pub fn build_canonical_request(
    method: &str,
    path: &str,
    canonical_query: &str,
    host: &str,
) -> String {
    format!("{method}\n{path}\n{canonical_query}\nhost:{host}\n\nhost\n{UNSIGNED_PAYLOAD}")
}

/// Build the string to sign.
///
/// ```text
/// GOOG4-RSA-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{hash}")
}

/// `{date}/auto/storage/goog4_request`.
pub fn credential_scope(date_stamp: &str) -> String {
    format!("{date_stamp}/auto/storage/goog4_request")
}

/// RSA-SHA256 signature of `message`, hex-encoded.
pub fn rsa_sha256_hex(key: &ServiceAccountKey, message: &str) -> Result<String> {
    let encoded = jsonwebtoken::crypto::sign(message.as_bytes(), &key.encoding_key()?, Algorithm::RS256)
        .map_err(|e| StorageError::Signing(e.to_string()))?;
    let raw = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| StorageError::Signing(e.to_string()))?;
    Ok(hex::encode(raw))
}

/// Split an endpoint like `https://storage.googleapis.com` into its
/// scheme-and-authority prefix, the `host[:port]` for the host header, and
/// any path prefix (without a trailing `/`).
fn endpoint_parts(endpoint: &str) -> Result<(String, String, String)> {
    let url = reqwest::Url::parse(endpoint)
        .map_err(|e| StorageError::Config(format!("invalid endpoint {endpoint}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| StorageError::Config(format!("endpoint {endpoint} has no host")))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let prefix = url.path().trim_end_matches('/').to_string();
    Ok((format!("{}://{host}", url.scheme()), host, prefix))
}

/// Produce a V4 signed URL for `bucket/object`, valid from `now`.
pub fn sign_url(
    key: &ServiceAccountKey,
    endpoint: &str,
    bucket: &str,
    object: &str,
    options: &SignedUrlOptions,
    now: DateTime<Utc>,
) -> Result<String> {
    validate_expiry(options.expires)?;

    let (base, host, prefix) = endpoint_parts(endpoint)?;
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let scope = credential_scope(&date_stamp);

    let path = format!(
        "{prefix}/{}/{}",
        uri_encode(bucket, true),
        uri_encode(object, false)
    );
    let query = build_canonical_query_string(&[
        ("X-Goog-Algorithm", ALGORITHM.to_string()),
        (
            "X-Goog-Credential",
            format!("{}/{}", key.client_email, scope),
        ),
        ("X-Goog-Date", timestamp.clone()),
        ("X-Goog-Expires", options.expires.as_secs().to_string()),
        ("X-Goog-SignedHeaders", "host".to_string()),
    ]);

    let canonical_request = build_canonical_request(options.method.as_str(), &path, &query, &host);
    let string_to_sign = build_string_to_sign(&timestamp, &scope, &canonical_request);
    let signature = rsa_sha256_hex(key, &string_to_sign)?;

    Ok(format!("{base}{path}?{query}&X-Goog-Signature={signature}"))
}
