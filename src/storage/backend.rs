//! Abstract storage backend trait and the bucket/object data model.
//!
//! Every backend must implement [`StorageBackend`].  The data types
//! deserialize directly from GCS JSON API resources, so the GCS backend
//! can hand them through unchanged and the in-memory backend produces the
//! same shapes.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;
use crate::lifecycle::{Lifecycle, StorageClass};

/// Bucket metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<StorageClass>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

/// Object metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub name: String,
    #[serde(default)]
    pub bucket: String,
    /// Size in bytes.  The JSON API sends this as a decimal string.
    #[serde(default, deserialize_with = "de_u64_lenient")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Base64-encoded MD5 of the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

/// Accept either a JSON number or a decimal string.
fn de_u64_lenient<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Text(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Body of a bucket insert.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBucket {
    pub name: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<StorageClass>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
}

impl NewBucket {
    /// A bucket with only a name and a location.
    pub fn new(name: &str, location: &str) -> Self {
        Self {
            name: name.to_string(),
            location: location.to_string(),
            ..Default::default()
        }
    }
}

/// Body of a bucket patch.  Only set fields are changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<StorageClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
}

/// A downloaded object's data plus the MD5 the server reported, if any.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Raw bytes of the object.
    pub data: Bytes,
    /// Base64-encoded MD5 from the server.
    pub md5_hash: Option<String>,
}

/// Base64-encoded MD5 digest, the format GCS uses for `md5Hash`.
pub fn md5_base64(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Async bucket/object storage contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// Fetch bucket metadata.  Fails with `NoSuchBucket` if absent.
    fn get_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bucket>> + Send + '_>>;

    /// Check whether a bucket exists.
    fn bucket_exists(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Create a bucket.  Fails with `BucketAlreadyExists` if taken.
    fn insert_bucket(
        &self,
        spec: &NewBucket,
    ) -> Pin<Box<dyn Future<Output = Result<Bucket>> + Send + '_>>;

    /// Update the fields set in `patch`.
    fn patch_bucket(
        &self,
        bucket: &str,
        patch: &BucketPatch,
    ) -> Pin<Box<dyn Future<Output = Result<Bucket>> + Send + '_>>;

    /// Write `data` to `bucket/name`, replacing any existing object.
    fn upload_object(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectInfo>> + Send + '_>>;

    /// Read the full object at `bucket/name`.
    fn download_object(
        &self,
        bucket: &str,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<StoredObject>> + Send + '_>>;

    /// Delete the object at `bucket/name`.  Fails with `NoSuchObject` if absent.
    fn delete_object(
        &self,
        bucket: &str,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// List every object in `bucket` (optionally under `prefix`), in name order.
    fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectInfo>>> + Send + '_>>;
}
