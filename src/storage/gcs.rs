//! Google Cloud Storage backend.
//!
//! Talks to the GCS JSON API with `reqwest`.  Every request carries a bearer
//! token from [`TokenProvider`], so the backend works equally against
//! `storage.googleapis.com` and a local emulator that accepts a static token.
//!
//! Endpoints used:
//!   Buckets:  `GET|PATCH /storage/v1/b/{bucket}`, `POST /storage/v1/b?project=`
//!   Objects:  `POST /upload/storage/v1/b/{bucket}/o?uploadType=media`,
//!             `GET|DELETE /storage/v1/b/{bucket}/o/{object}`,
//!             `GET /storage/v1/b/{bucket}/o` (paginated)

use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

use super::backend::{Bucket, BucketPatch, NewBucket, ObjectInfo, StorageBackend, StoredObject};
use crate::errors::{Result, StorageError};
use crate::token::TokenProvider;

/// Public GCS endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Unreserved characters stay literal in path segments; everything else,
/// `/` included, is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

// -- GCS JSON API response types -----------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsListResponse {
    #[serde(default)]
    items: Vec<ObjectInfo>,
    next_page_token: Option<String>,
}

/// Storage backend for a GCS project.
pub struct GcsBackend {
    client: reqwest::Client,
    endpoint: String,
    project: String,
    tokens: TokenProvider,
}

impl GcsBackend {
    /// Create a backend for `project` at `endpoint`.
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        project: &str,
        tokens: TokenProvider,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project: project.to_string(),
            tokens,
        }
    }

    /// Project new buckets are created in.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Build authorization headers for GCS API calls.
    async fn auth_headers(&self) -> Result<HeaderMap> {
        let token = self.tokens.access_token().await?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StorageError::Token(format!("invalid auth header value: {e}")))?,
        );
        Ok(headers)
    }

    /// Percent-encode a bucket or object name for use as one path segment.
    fn encode_segment(name: &str) -> String {
        utf8_percent_encode(name, PATH_SEGMENT).to_string()
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!(
            "{}/storage/v1/b/{}",
            self.endpoint,
            Self::encode_segment(bucket)
        )
    }

    fn object_url(&self, bucket: &str, object: &str) -> String {
        format!(
            "{}/o/{}",
            self.bucket_url(bucket),
            Self::encode_segment(object)
        )
    }

    /// Pass a successful response through, otherwise turn it into an error.
    /// `not_found` builds the error for a 404.
    async fn check(
        resp: Response,
        context: &str,
        not_found: impl FnOnce() -> StorageError,
    ) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(StorageError::from_gcs_response(context, status, &body))
    }

    fn no_such_bucket(bucket: &str) -> impl FnOnce() -> StorageError + '_ {
        move || StorageError::NoSuchBucket {
            bucket: bucket.to_string(),
        }
    }

    fn no_such_object<'a>(bucket: &'a str, object: &'a str) -> impl FnOnce() -> StorageError + 'a {
        move || StorageError::NoSuchObject {
            bucket: bucket.to_string(),
            object: object.to_string(),
        }
    }

    // -- GCS API operations ---------------------------------------------------

    async fn gcs_get_bucket(&self, bucket: &str) -> Result<Bucket> {
        let auth = self.auth_headers().await?;
        let resp = self
            .client
            .get(self.bucket_url(bucket))
            .headers(auth)
            .send()
            .await?;
        let resp = Self::check(resp, "get bucket", Self::no_such_bucket(bucket)).await?;
        Ok(resp.json().await?)
    }

    async fn gcs_bucket_exists(&self, bucket: &str) -> Result<bool> {
        let auth = self.auth_headers().await?;
        let resp = self
            .client
            .get(self.bucket_url(bucket))
            .headers(auth)
            .query(&[("fields", "name")])
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(true)
        } else if resp.status() == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(StorageError::from_gcs_response("bucket exists", status, &body))
        }
    }

    async fn gcs_insert_bucket(&self, spec: &NewBucket) -> Result<Bucket> {
        let auth = self.auth_headers().await?;
        let resp = self
            .client
            .post(format!("{}/storage/v1/b", self.endpoint))
            .headers(auth)
            .query(&[("project", self.project.as_str())])
            .json(spec)
            .send()
            .await?;

        if resp.status() == StatusCode::CONFLICT {
            return Err(StorageError::BucketAlreadyExists {
                bucket: spec.name.clone(),
            });
        }
        // A 404 on insert means the project itself is unknown.
        let resp = Self::check(resp, "insert bucket", || StorageError::Api {
            context: "insert bucket".to_string(),
            status: 404,
            message: format!("project {} not found", self.project),
        })
        .await?;
        Ok(resp.json().await?)
    }

    async fn gcs_patch_bucket(&self, bucket: &str, patch: &BucketPatch) -> Result<Bucket> {
        let auth = self.auth_headers().await?;
        let resp = self
            .client
            .patch(self.bucket_url(bucket))
            .headers(auth)
            .json(patch)
            .send()
            .await?;
        let resp = Self::check(resp, "patch bucket", Self::no_such_bucket(bucket)).await?;
        Ok(resp.json().await?)
    }

    /// Upload an object via simple media upload.
    async fn gcs_upload(
        &self,
        bucket: &str,
        object: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<ObjectInfo> {
        let auth = self.auth_headers().await?;
        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.endpoint,
            Self::encode_segment(bucket)
        );

        let resp = self
            .client
            .post(&url)
            .headers(auth)
            .query(&[("uploadType", "media"), ("name", object)])
            .header(CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;
        let resp = Self::check(resp, "upload", Self::no_such_bucket(bucket)).await?;
        Ok(resp.json().await?)
    }

    async fn gcs_download(&self, bucket: &str, object: &str) -> Result<StoredObject> {
        let auth = self.auth_headers().await?;
        let resp = self
            .client
            .get(self.object_url(bucket, object))
            .headers(auth)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let resp = Self::check(resp, "download", Self::no_such_object(bucket, object)).await?;

        let md5_hash = md5_from_hash_headers(resp.headers());
        let data = resp.bytes().await?;
        Ok(StoredObject { data, md5_hash })
    }

    async fn gcs_delete(&self, bucket: &str, object: &str) -> Result<()> {
        let auth = self.auth_headers().await?;
        let resp = self
            .client
            .delete(self.object_url(bucket, object))
            .headers(auth)
            .send()
            .await?;
        Self::check(resp, "delete", Self::no_such_object(bucket, object)).await?;
        Ok(())
    }

    /// List objects, following `nextPageToken` until exhausted.
    async fn gcs_list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        let auth = self.auth_headers().await?;
        let url = format!("{}/o", self.bucket_url(bucket));
        let mut all_objects: Vec<ObjectInfo> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self.client.get(&url).headers(auth.clone());
            if let Some(prefix) = prefix {
                req = req.query(&[("prefix", prefix)]);
            }
            if let Some(ref token) = page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }

            let resp = req.send().await?;
            let resp = Self::check(resp, "list", Self::no_such_bucket(bucket)).await?;
            let page: GcsListResponse = resp.json().await?;

            all_objects.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(all_objects)
    }
}

/// Pull the `md5=` entry out of `x-goog-hash` headers.
///
/// GCS sends either one header with comma-separated entries or one header
/// per hash, e.g. `crc32c=n03x6A==,md5=Ojk9c3dhfxgoKVVHYwFbHQ==`.
fn md5_from_hash_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all("x-goog-hash")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|entry| entry.trim().strip_prefix("md5=").map(str::to_string))
}

impl StorageBackend for GcsBackend {
    fn get_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bucket>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("GCS get bucket: {}", bucket);
            self.gcs_get_bucket(&bucket).await
        })
    }

    fn bucket_exists(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move { self.gcs_bucket_exists(&bucket).await })
    }

    fn insert_bucket(
        &self,
        spec: &NewBucket,
    ) -> Pin<Box<dyn Future<Output = Result<Bucket>> + Send + '_>> {
        let spec = spec.clone();
        Box::pin(async move {
            debug!(
                "GCS insert bucket: project={} name={} location={}",
                self.project, spec.name, spec.location
            );
            self.gcs_insert_bucket(&spec).await
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
            debug!("GCS patch bucket: {}", bucket);
            self.gcs_patch_bucket(&bucket, &patch).await
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
            debug!(
                "GCS upload: bucket={} name={} bytes={}",
                bucket,
                name,
                data.len()
            );
            self.gcs_upload(&bucket, &name, data, &content_type).await
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
            debug!("GCS download: bucket={} name={}", bucket, name);
            self.gcs_download(&bucket, &name).await
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
            debug!("GCS delete: bucket={} name={}", bucket, name);
            self.gcs_delete(&bucket, &name).await
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectInfo>>> + Send + '_>> {
        let bucket = bucket.to_string();
        let prefix = prefix.map(str::to_string);
        Box::pin(async move {
            debug!("GCS list: bucket={} prefix={:?}", bucket, prefix);
            self.gcs_list_objects(&bucket, prefix.as_deref()).await
        })
    }
}
