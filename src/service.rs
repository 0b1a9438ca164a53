//! Service-account storage facade.
//!
//! [`ServiceAccountStorage`] is the entry point for callers: it owns the
//! loaded key, the configuration and a [`StorageBackend`], and exposes the
//! bucket and object helpers.  Every failure is logged before it is
//! returned (or swallowed into a default, for the helpers that do so).

use bytes::Bytes;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::config::Config;
use crate::credentials::ServiceAccountKey;
use crate::errors::{Result, StorageError};
use crate::lifecycle::Lifecycle;
use crate::metrics;
use crate::naming::{object_name_for_path, validate_bucket_name};
use crate::signing::{self, SignedUrlMethod, SignedUrlOptions};
use crate::storage::backend::{
    md5_base64, Bucket, BucketPatch, NewBucket, ObjectInfo, StorageBackend,
};
use crate::storage::gcs::GcsBackend;
use crate::token::TokenProvider;

/// Time `fut` and record its outcome under `operation`.
async fn observe<T, F>(operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    metrics::record_operation(operation, result.is_ok(), start.elapsed());
    result
}

/// Bucket and object helpers authenticated as one service account.
pub struct ServiceAccountStorage {
    config: Config,
    key: Arc<ServiceAccountKey>,
    backend: Arc<dyn StorageBackend>,
}

impl ServiceAccountStorage {
    /// Load the service-account key named in `config` and connect to GCS.
    pub fn new(config: Config) -> Result<Self> {
        let key = ServiceAccountKey::from_file(&config.credentials_file)
            .inspect_err(|e| error!("Failed to initialize storage service: {e}"))?;
        let key = Arc::new(key);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .inspect_err(|e| error!("Failed to initialize storage service: {e}"))?;
        let tokens = TokenProvider::new(http.clone(), Arc::clone(&key), config.access_token.clone());
        let backend = GcsBackend::new(http, &config.api_endpoint, &key.project_id, tokens);

        info!(
            "Storage service initialized for project {} as {}",
            key.project_id, key.client_email
        );
        Ok(Self::with_backend(config, key, Arc::new(backend)))
    }

    /// Build on an existing backend.
    pub fn with_backend(
        config: Config,
        key: Arc<ServiceAccountKey>,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            config,
            key,
            backend,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.key.project_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── Buckets ─────────────────────────────────────────────────────

    /// Fetch a bucket by name.
    pub async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        observe("get_bucket", self.backend.get_bucket(name))
            .await
            .inspect_err(|e| error!("Failed to get bucket {name}: {e}"))
    }

    /// Create a bucket in `location` with server-side defaults.
    pub async fn create_bucket(&self, name: &str, location: &str) -> Result<Bucket> {
        let result = observe("create_bucket", async {
            validate_bucket_name(name)?;
            self.backend
                .insert_bucket(&NewBucket::new(name, location))
                .await
        })
        .await;

        match result {
            Ok(bucket) => {
                info!("Created bucket {name}");
                Ok(bucket)
            }
            Err(e) => {
                error!("Failed to create bucket {name}: {e}");
                Err(e)
            }
        }
    }

    /// Return the named bucket, creating it with the configured location,
    /// storage class, labels and lifecycle rules if it does not exist.
    pub async fn get_or_create_bucket(&self, name: &str) -> Result<Bucket> {
        observe("get_or_create_bucket", self.ensure_bucket(name))
            .await
            .inspect_err(|e| error!("Error with bucket {name}: {e}"))
    }

    async fn ensure_bucket(&self, name: &str) -> Result<Bucket> {
        if self.backend.bucket_exists(name).await? {
            info!("Using existing bucket: {name}");
            return self.backend.get_bucket(name).await;
        }

        validate_bucket_name(name)?;
        let defaults = &self.config.bucket;
        let created = match self
            .backend
            .insert_bucket(&NewBucket::new(name, &defaults.location))
            .await
        {
            Ok(bucket) => bucket,
            // Lost a creation race; the winner's settings stand.
            Err(StorageError::BucketAlreadyExists { .. }) => {
                info!("Bucket {name} was created concurrently, using it");
                return self.backend.get_bucket(name).await;
            }
            Err(e) => return Err(e),
        };

        let patch = BucketPatch {
            storage_class: Some(defaults.default_storage_class),
            labels: Some(defaults.labels.clone()),
            lifecycle: Some(Lifecycle {
                rule: defaults.lifecycle.rules(),
            }),
        };
        let bucket = self.backend.patch_bucket(&created.name, &patch).await?;

        info!(
            "Created new bucket: {name} in {} with storage class {}",
            defaults.location, defaults.default_storage_class
        );
        Ok(bucket)
    }

    // ── Objects ─────────────────────────────────────────────────────

    /// Upload a local file into `bucket` (created if needed), named after
    /// the file's last path component.
    pub async fn upload_object(&self, bucket: &str, path: &Path) -> Result<ObjectInfo> {
        observe("upload_file", self.upload_inner(bucket, path))
            .await
            .inspect_err(|e| error!("Failed to upload file {}: {e}", path.display()))
    }

    async fn upload_inner(&self, bucket: &str, path: &Path) -> Result<ObjectInfo> {
        let object_name = object_name_for_path(path)?;
        let data = Bytes::from(tokio::fs::read(path).await?);

        self.ensure_bucket(bucket).await?;

        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        let expected = md5_base64(&data);
        let size = data.len() as u64;
        let info = self
            .backend
            .upload_object(bucket, &object_name, data, content_type.as_ref())
            .await?;

        if let Some(actual) = &info.md5_hash {
            if *actual != expected {
                return Err(StorageError::ChecksumMismatch {
                    object: object_name,
                    expected,
                    actual: actual.clone(),
                });
            }
        }

        metrics::record_bytes_uploaded(size);
        info!("Successfully uploaded {} to {bucket}", path.display());
        Ok(info)
    }

    /// Upload a local file; returns the object name, or `None` on failure.
    pub async fn upload_file(&self, bucket: &str, path: &Path) -> Option<String> {
        self.upload_object(bucket, path).await.ok().map(|info| info.name)
    }

    /// Download `object` from an existing bucket to `dest`.
    ///
    /// The file is written to a temporary sibling and renamed into place,
    /// so `dest` is never left half-written.
    pub async fn download_file(&self, bucket: &str, object: &str, dest: &Path) -> Result<()> {
        observe("download_file", self.download_inner(bucket, object, dest))
            .await
            .inspect_err(|e| error!("Failed to download file {object}: {e}"))
    }

    async fn download_inner(&self, bucket: &str, object: &str, dest: &Path) -> Result<()> {
        self.backend.get_bucket(bucket).await?;
        let stored = self.backend.download_object(bucket, object).await?;

        if let Some(expected) = &stored.md5_hash {
            let actual = md5_base64(&stored.data);
            if actual != *expected {
                return Err(StorageError::ChecksumMismatch {
                    object: object.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let size = stored.data.len() as u64;
        write_atomic(dest.to_path_buf(), stored.data).await?;

        metrics::record_bytes_downloaded(size);
        info!("Downloaded {object} to {}", dest.display());
        Ok(())
    }

    /// Delete `object` from an existing bucket.
    pub async fn delete_file(&self, bucket: &str, object: &str) -> Result<()> {
        observe("delete_file", async {
            self.backend.get_bucket(bucket).await?;
            self.backend.delete_object(bucket, object).await
        })
        .await
        .inspect(|_| info!("Deleted file {object} from bucket {bucket}"))
        .inspect_err(|e| error!("Failed to delete file {object}: {e}"))
    }

    /// Metadata for every object in `bucket`, optionally under `prefix`.
    pub async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        observe("list_files", self.backend.list_objects(bucket, prefix))
            .await
            .inspect_err(|e| error!("Failed to list files: {e}"))
    }

    /// Names of every object in `bucket`; empty on failure.
    pub async fn list_files(&self, bucket: &str) -> Vec<String> {
        self.list_objects(bucket, None)
            .await
            .map(|objects| objects.into_iter().map(|o| o.name).collect())
            .unwrap_or_default()
    }

    // ── Signed URLs ─────────────────────────────────────────────────

    /// A V4 signed URL for `bucket/object`.  No API call is made.
    pub fn signed_url(
        &self,
        bucket: &str,
        object: &str,
        options: &SignedUrlOptions,
    ) -> Result<String> {
        let start = Instant::now();
        let result = signing::sign_url(
            &self.key,
            &self.config.api_endpoint,
            bucket,
            object,
            options,
            chrono::Utc::now(),
        );
        metrics::record_operation("get_signed_url", result.is_ok(), start.elapsed());
        result.inspect_err(|e| error!("Failed to generate signed URL: {e}"))
    }

    /// A GET signed URL using the configured lifetime; `None` on failure.
    pub fn get_signed_url(&self, bucket: &str, object: &str) -> Option<String> {
        let options = SignedUrlOptions {
            method: SignedUrlMethod::Get,
            expires: Duration::from_secs(self.config.signed_url.expiry_secs),
        };
        self.signed_url(bucket, object, &options).ok()
    }
}

/// Write `data` to a temp file beside `dest`, then rename it over `dest`.
async fn write_atomic(dest: PathBuf, data: Bytes) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        std::io::Write::write_all(&mut tmp, &data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
}
