//! In-memory storage backend.
//!
//! Buckets and their objects are held in a `tokio::sync::RwLock<HashMap<...>>`.
//! Error semantics match [`super::gcs::GcsBackend`] so the service layer and
//! its tests behave the same against either backend.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use super::backend::{
    md5_base64, Bucket, BucketPatch, NewBucket, ObjectInfo, StorageBackend, StoredObject,
};
use crate::errors::{Result, StorageError};
use crate::lifecycle::StorageClass;

struct MemoryBucket {
    meta: Bucket,
    /// object name -> (data, metadata)
    objects: BTreeMap<String, (Bytes, ObjectInfo)>,
}

/// In-memory storage backend.
pub struct MemoryBackend {
    buckets: tokio::sync::RwLock<HashMap<String, MemoryBucket>>,
    /// Monotonic source for object generations.
    generation: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            buckets: tokio::sync::RwLock::new(HashMap::new()),
            generation: AtomicU64::new(1),
        }
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    fn no_such_bucket(bucket: &str) -> StorageError {
        StorageError::NoSuchBucket {
            bucket: bucket.to_string(),
        }
    }

    /// Number of objects currently stored in `bucket`, if it exists.
    pub async fn object_count(&self, bucket: &str) -> Option<usize> {
        let buckets = self.buckets.read().await;
        buckets.get(bucket).map(|b| b.objects.len())
    }
}

impl StorageBackend for MemoryBackend {
    fn get_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bucket>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            buckets
                .get(&bucket)
                .map(|b| b.meta.clone())
                .ok_or_else(|| Self::no_such_bucket(&bucket))
        })
    }

    fn bucket_exists(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move { Ok(self.buckets.read().await.contains_key(&bucket)) })
    }

    fn insert_bucket(
        &self,
        spec: &NewBucket,
    ) -> Pin<Box<dyn Future<Output = Result<Bucket>> + Send + '_>> {
        let spec = spec.clone();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            if buckets.contains_key(&spec.name) {
                return Err(StorageError::BucketAlreadyExists { bucket: spec.name });
            }

            let now = Self::now();
            let meta = Bucket {
                name: spec.name.clone(),
                location: Some(spec.location.to_uppercase()),
                storage_class: Some(spec.storage_class.unwrap_or(StorageClass::Standard)),
                labels: spec.labels,
                lifecycle: spec.lifecycle,
                time_created: Some(now.clone()),
                updated: Some(now),
            };
            buckets.insert(
                spec.name,
                MemoryBucket {
                    meta: meta.clone(),
                    objects: BTreeMap::new(),
                },
            );
            Ok(meta)
        })
    }

    fn patch_bucket(
        &self,
        bucket: &str,
        patch: &BucketPatch,
    ) -> Pin<Box<dyn Future<Output = Result<Bucket>> + Send + '_>> {
        let bucket = bucket.to_string();
        let patch = patch.clone();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            let entry = buckets
                .get_mut(&bucket)
                .ok_or_else(|| Self::no_such_bucket(&bucket))?;

            if let Some(class) = patch.storage_class {
                entry.meta.storage_class = Some(class);
            }
            if let Some(labels) = patch.labels {
                entry.meta.labels = labels;
            }
            if let Some(lifecycle) = patch.lifecycle {
                entry.meta.lifecycle = Some(lifecycle);
            }
            entry.meta.updated = Some(Self::now());
            Ok(entry.meta.clone())
        })
    }

    fn upload_object(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectInfo>> + Send + '_>> {
        let bucket = bucket.to_string();
        let name = name.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            let entry = buckets
                .get_mut(&bucket)
                .ok_or_else(|| Self::no_such_bucket(&bucket))?;

            let generation = self.generation.fetch_add(1, Ordering::Relaxed);
            let info = ObjectInfo {
                name: name.clone(),
                bucket: bucket.clone(),
                size: data.len() as u64,
                content_type: Some(content_type),
                md5_hash: Some(md5_base64(&data)),
                generation: Some(generation.to_string()),
                updated: Some(Self::now()),
            };
            entry.objects.insert(name, (data, info.clone()));
            Ok(info)
        })
    }

    fn download_object(
        &self,
        bucket: &str,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<StoredObject>> + Send + '_>> {
        let bucket = bucket.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            let entry = buckets
                .get(&bucket)
                .ok_or_else(|| Self::no_such_bucket(&bucket))?;
            match entry.objects.get(&name) {
                Some((data, info)) => Ok(StoredObject {
                    data: data.clone(),
                    md5_hash: info.md5_hash.clone(),
                }),
                None => Err(StorageError::NoSuchObject {
                    bucket,
                    object: name,
                }),
            }
        })
    }

    fn delete_object(
        &self,
        bucket: &str,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let name = name.to_string();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            let entry = buckets
                .get_mut(&bucket)
                .ok_or_else(|| Self::no_such_bucket(&bucket))?;
            match entry.objects.remove(&name) {
                Some(_) => Ok(()),
                None => Err(StorageError::NoSuchObject {
                    bucket,
                    object: name,
                }),
            }
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectInfo>>> + Send + '_>> {
        let bucket = bucket.to_string();
        let prefix = prefix.unwrap_or("").to_string();
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            let entry = buckets
                .get(&bucket)
                .ok_or_else(|| Self::no_such_bucket(&bucket))?;
            Ok(entry
                .objects
                .range(prefix.clone()..)
                .take_while(|(name, _)| name.starts_with(&prefix))
                .map(|(_, (_, info))| info.clone())
                .collect())
        })
    }
}
