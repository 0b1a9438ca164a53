//! Storage classes and bucket lifecycle rules.
//!
//! These types serialize to exactly the JSON shape the GCS JSON API uses
//! for the `storageClass` and `lifecycle` bucket fields, so they can be
//! sent in insert/patch bodies and read back from bucket metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::StorageError;

/// GCS storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    Standard,
    Nearline,
    Coldline,
    Archive,
    MultiRegional,
    Regional,
    DurableReducedAvailability,
}

impl StorageClass {
    /// The wire name, e.g. `NEARLINE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::Nearline => "NEARLINE",
            StorageClass::Coldline => "COLDLINE",
            StorageClass::Archive => "ARCHIVE",
            StorageClass::MultiRegional => "MULTI_REGIONAL",
            StorageClass::Regional => "REGIONAL",
            StorageClass::DurableReducedAvailability => "DURABLE_REDUCED_AVAILABILITY",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STANDARD" => Ok(StorageClass::Standard),
            "NEARLINE" => Ok(StorageClass::Nearline),
            "COLDLINE" => Ok(StorageClass::Coldline),
            "ARCHIVE" => Ok(StorageClass::Archive),
            "MULTI_REGIONAL" => Ok(StorageClass::MultiRegional),
            "REGIONAL" => Ok(StorageClass::Regional),
            "DURABLE_REDUCED_AVAILABILITY" => Ok(StorageClass::DurableReducedAvailability),
            other => Err(StorageError::Config(format!(
                "unknown storage class: {other}"
            ))),
        }
    }
}

/// What a lifecycle rule does once its condition matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleAction {
    /// Move the object to another storage class.
    #[serde(rename_all = "camelCase")]
    SetStorageClass { storage_class: StorageClass },
    /// Delete the object.
    Delete,
    /// Abort an incomplete multipart upload.
    AbortIncompleteMultipartUpload,
}

/// When a lifecycle rule applies.  Unset fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleCondition {
    /// Minimum object age in days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,

    /// Only objects currently in one of these classes match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches_storage_class: Vec<StorageClass>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_newer_versions: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_live: Option<bool>,
}

/// A single lifecycle rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRule {
    pub action: LifecycleAction,
    pub condition: LifecycleCondition,
}

impl LifecycleRule {
    /// Transition objects of class `from` to class `to` after `age` days.
    pub fn transition(from: StorageClass, to: StorageClass, age: u32) -> Self {
        Self {
            action: LifecycleAction::SetStorageClass { storage_class: to },
            condition: LifecycleCondition {
                age: Some(age),
                matches_storage_class: vec![from],
                ..Default::default()
            },
        }
    }

    /// Delete objects after `age` days, whatever their class.
    pub fn delete_after(age: u32) -> Self {
        Self {
            action: LifecycleAction::Delete,
            condition: LifecycleCondition {
                age: Some(age),
                ..Default::default()
            },
        }
    }
}

/// The bucket `lifecycle` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    #[serde(default)]
    pub rule: Vec<LifecycleRule>,
}
