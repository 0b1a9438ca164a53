//! Configuration loading and types.
//!
//! Configuration is read from an optional YAML file, then overlaid with
//! `GCS_*` environment variables, then validated.  Every field has a
//! default, so running with no file and no environment gives a usable
//! development setup.

use garde::Validate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{Result, StorageError};
use crate::lifecycle::{LifecycleRule, StorageClass};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    /// Path to the service-account JSON key file.
    #[serde(default = "default_credentials_file")]
    #[garde(length(min = 1))]
    pub credentials_file: String,

    /// GCS JSON API base URL.
    #[serde(default = "default_api_endpoint")]
    #[garde(pattern(r"^https?://[^/]+"))]
    pub api_endpoint: String,

    /// Static bearer token.  Skips the JWT exchange when set.
    #[serde(default)]
    #[garde(skip)]
    pub access_token: Option<String>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    #[garde(range(min = 1))]
    pub request_timeout_secs: u64,

    /// Settings applied to buckets created by `get_or_create_bucket`.
    #[serde(default)]
    #[garde(dive)]
    pub bucket: BucketDefaults,

    /// Signed URL settings.
    #[serde(default)]
    #[garde(dive)]
    pub signed_url: SignedUrlConfig,

    /// Logging settings.
    #[serde(default)]
    #[garde(dive)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_file: default_credentials_file(),
            api_endpoint: default_api_endpoint(),
            access_token: None,
            request_timeout_secs: default_request_timeout(),
            bucket: BucketDefaults::default(),
            signed_url: SignedUrlConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Location, class, labels and lifecycle for newly created buckets.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BucketDefaults {
    /// Bucket location (region or multi-region).
    #[serde(default = "default_location")]
    #[garde(length(min = 1))]
    pub location: String,

    #[serde(default = "default_storage_class")]
    #[garde(skip)]
    pub default_storage_class: StorageClass,

    #[serde(default = "default_labels")]
    #[garde(skip)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    #[garde(dive)]
    pub lifecycle: LifecycleConfig,
}

impl Default for BucketDefaults {
    fn default() -> Self {
        Self {
            location: default_location(),
            default_storage_class: default_storage_class(),
            labels: default_labels(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

/// Storage-class transition ages, in days.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LifecycleConfig {
    /// STANDARD -> NEARLINE.
    #[serde(default = "default_nearline_age")]
    #[garde(range(min = 1))]
    pub nearline_age_days: u32,

    /// NEARLINE -> COLDLINE.
    #[serde(default = "default_coldline_age")]
    #[garde(range(min = 1))]
    pub coldline_age_days: u32,

    /// Delete, regardless of class.
    #[serde(default = "default_delete_age")]
    #[garde(range(min = 1))]
    pub delete_age_days: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            nearline_age_days: default_nearline_age(),
            coldline_age_days: default_coldline_age(),
            delete_age_days: default_delete_age(),
        }
    }
}

impl LifecycleConfig {
    /// The three lifecycle rules applied to new buckets, in order:
    /// STANDARD -> NEARLINE, NEARLINE -> COLDLINE, then delete.
    pub fn rules(&self) -> Vec<LifecycleRule> {
        vec![
            LifecycleRule::transition(
                StorageClass::Standard,
                StorageClass::Nearline,
                self.nearline_age_days,
            ),
            LifecycleRule::transition(
                StorageClass::Nearline,
                StorageClass::Coldline,
                self.coldline_age_days,
            ),
            LifecycleRule::delete_after(self.delete_age_days),
        ]
    }
}

/// Signed URL configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignedUrlConfig {
    /// Lifetime of URLs from `get_signed_url`, in seconds (max 7 days).
    #[serde(default = "default_signed_url_expiry")]
    #[garde(range(min = 1, max = 604_800))]
    pub expiry_secs: u64,
}

impl Default for SignedUrlConfig {
    fn default() -> Self {
        Self {
            expiry_secs: default_signed_url_expiry(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    #[garde(pattern(r"^(trace|debug|info|warn|error)$"))]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    #[garde(pattern(r"^(text|json)$"))]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_credentials_file() -> String {
    "./common/service-account.json".to_string()
}

fn default_api_endpoint() -> String {
    crate::storage::gcs::DEFAULT_ENDPOINT.to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_location() -> String {
    "asia-south1".to_string()
}

fn default_storage_class() -> StorageClass {
    StorageClass::Standard
}

fn default_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("environment".to_string(), "development".to_string()),
        ("project".to_string(), "dust-info".to_string()),
    ])
}

fn default_nearline_age() -> u32 {
    30
}

fn default_coldline_age() -> u32 {
    90
}

fn default_delete_age() -> u32 {
    365
}

fn default_signed_url_expiry() -> u64 {
    900
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Environment overrides ---------------------------------------------------

impl Config {
    /// Overlay `GCS_*` environment variables.
    ///
    /// `lookup` resolves a variable name; pass `|k| std::env::var(k).ok()`
    /// for the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GCS_CREDENTIALS_FILE") {
            self.credentials_file = v;
        }
        if let Some(v) = lookup("GCS_API_ENDPOINT") {
            self.api_endpoint = v;
        }
        if let Some(v) = lookup("GCS_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = lookup("GCS_LOCATION") {
            self.bucket.location = v;
        }
        if let Some(v) = lookup("GCS_STORAGE_CLASS") {
            self.bucket.default_storage_class = v.parse()?;
        }
        if let Some(v) = lookup("GCS_ENV") {
            self.bucket.labels.insert("environment".to_string(), v);
        }
        if let Some(v) = lookup("GCS_PROJECT") {
            self.bucket.labels.insert("project".to_string(), v);
        }

        let lifecycle = &mut self.bucket.lifecycle;
        for (var, slot) in [
            ("GCS_NEARLINE_AGE_DAYS", &mut lifecycle.nearline_age_days),
            ("GCS_COLDLINE_AGE_DAYS", &mut lifecycle.coldline_age_days),
            ("GCS_DELETE_AGE_DAYS", &mut lifecycle.delete_age_days),
        ] {
            if let Some(v) = lookup(var) {
                *slot = v.trim().parse().map_err(|_| {
                    StorageError::Config(format!("{var} must be a whole number of days, got {v:?}"))
                })?;
            }
        }

        Ok(())
    }

    /// Replace the key file path and re-run [`Config::check`].
    pub fn set_credentials_file(&mut self, path: impl Into<String>) -> Result<()> {
        self.credentials_file = path.into();
        self.check()
    }

    /// Validate field constraints and the transition-age ordering.
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        let lc = &self.bucket.lifecycle;
        if !(lc.nearline_age_days < lc.coldline_age_days
            && lc.coldline_age_days < lc.delete_age_days)
        {
            return Err(StorageError::Config(format!(
                "lifecycle ages must increase: nearline={} coldline={} delete={}",
                lc.nearline_age_days, lc.coldline_age_days, lc.delete_age_days
            )));
        }
        Ok(())
    }
}

// -- Loader ------------------------------------------------------------------

/// Parse configuration from a YAML string (no overrides, no validation).
pub fn parse_config(contents: &str) -> Result<Config> {
    // An empty document deserializes as null, not as an empty mapping.
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(contents).map_err(|e| StorageError::Config(e.to_string()))
}

/// Load configuration from `path` (or defaults), apply environment
/// overrides from the process environment, and validate.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
                StorageError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
            })?;
            parse_config(&contents)?
        }
        None => Config::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.check()?;
    Ok(config)
}
