//! Service-account key loading.

use jsonwebtoken::EncodingKey;
use serde::Deserialize;
use std::path::Path;

use crate::errors::{Result, StorageError};

/// Default OAuth2 token endpoint for service-account JWT exchange.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// The subset of a Google service-account JSON key this crate needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

// Keep the private key out of logs.
impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Read and validate a key file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|e| StorageError::Credentials {
            path: display.clone(),
            message: e.to_string(),
        })?;
        Self::from_json(&contents).map_err(|message| StorageError::Credentials {
            path: display,
            message,
        })
    }

    /// Parse and validate key JSON.
    pub fn from_json(contents: &str) -> std::result::Result<Self, String> {
        let key: ServiceAccountKey =
            serde_json::from_str(contents).map_err(|e| format!("malformed key JSON: {e}"))?;

        if key.key_type != "service_account" {
            return Err(format!(
                "unsupported credential type {:?}, expected \"service_account\"",
                key.key_type
            ));
        }
        for (field, value) in [
            ("project_id", &key.project_id),
            ("client_email", &key.client_email),
            ("private_key", &key.private_key),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{field} is empty"));
            }
        }
        Ok(key)
    }

    /// RSA signing key for RS256.
    pub fn encoding_key(&self) -> Result<EncodingKey> {
        EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| StorageError::Signing(format!("invalid private key: {e}")))
    }
}
