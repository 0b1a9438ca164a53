//! End-to-end tests of `ServiceAccountStorage` against a mock GCS JSON API.

mod common;

use common::{bucket_json, mock_token, object_json, test_config, CLIENT_EMAIL};
use httpmock::prelude::*;
use httpmock::Method::PATCH;
use serde_json::json;
use storage_service::lifecycle::StorageClass;
use storage_service::ServiceAccountStorage;

const BEARER: &str = "Bearer ya29.test-token";
const HELLO_MD5: &str = "XrY7u+Ae7tCTyyK7j1rNww==";

#[tokio::test]
async fn test_token_exchanged_once_and_cached() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let token = mock_token(&server).await;
    let get = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/storage/v1/b/dust-uploads")
                .header("authorization", BEARER);
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    assert_eq!(storage.project_id(), "dust-info");

    let bucket = storage.get_bucket("dust-uploads").await.unwrap();
    assert_eq!(bucket.name, "dust-uploads");
    assert_eq!(bucket.storage_class, Some(StorageClass::Standard));
    storage.get_bucket("dust-uploads").await.unwrap();

    token.assert_hits_async(1).await;
    get.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_short_lived_token_is_refreshed() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    // Inside the 60 s refresh margin, so the token is never reused.
    let token = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .json_body(json!({"access_token": "ya29.test-token", "expires_in": 30}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/storage/v1/b/dust-uploads")
                .header("authorization", BEARER);
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    storage.get_bucket("dust-uploads").await.unwrap();
    storage.get_bucket("dust-uploads").await.unwrap();

    token.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_concurrent_callers_share_one_exchange() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let token = mock_token(&server).await;
    let get = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/storage/v1/b/dust-uploads")
                .header("authorization", BEARER);
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let (a, b, c, d) = tokio::join!(
        storage.get_bucket("dust-uploads"),
        storage.get_bucket("dust-uploads"),
        storage.get_bucket("dust-uploads"),
        storage.get_bucket("dust-uploads"),
    );
    for result in [a, b, c, d] {
        result.unwrap();
    }

    token.assert_hits_async(1).await;
    get.assert_hits_async(4).await;
}

#[tokio::test]
async fn test_static_access_token_skips_exchange() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let token = mock_token(&server).await;
    let get = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/storage/v1/b/dust-uploads")
                .header("authorization", "Bearer emulator");
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;

    let mut config = test_config(&dir, &server);
    config.access_token = Some("emulator".to_string());
    let storage = ServiceAccountStorage::new(config).unwrap();
    storage.get_bucket("dust-uploads").await.unwrap();

    get.assert_async().await;
    token.assert_hits_async(0).await;
}

#[tokio::test]
async fn test_token_endpoint_failure() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(400)
                .json_body(json!({"error": "invalid_grant", "error_description": "Invalid JWT"}));
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let err = storage.get_bucket("dust-uploads").await.unwrap_err();
    assert_eq!(err.code(), "Token");
    assert!(err.to_string().contains("invalid_grant"));
}

#[tokio::test]
async fn test_get_bucket_forbidden() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads");
            then.status(403).json_body(json!({
                "error": {"code": 403, "message": "uploader does not have storage.buckets.get access"}
            }));
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let err = storage.get_bucket("dust-uploads").await.unwrap_err();
    assert_eq!(err.code(), "AccessDenied");
    assert!(err.to_string().contains("storage.buckets.get"));
}

#[tokio::test]
async fn test_get_or_create_inserts_then_patches() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;

    let exists = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/storage/v1/b/new-bucket")
                .query_param("fields", "name");
            then.status(404)
                .json_body(json!({"error": {"code": 404, "message": "Not Found"}}));
        })
        .await;
    let insert = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/storage/v1/b")
                .query_param("project", "dust-info")
                .json_body_partial(r#"{"name": "new-bucket", "location": "asia-south1"}"#);
            then.status(200).json_body(bucket_json("new-bucket"));
        })
        .await;
    let patch = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/storage/v1/b/new-bucket")
                .json_body_partial(
                    r#"{"storageClass": "STANDARD", "labels": {"environment": "development", "project": "dust-info"}}"#,
                )
                .body_contains(r#""type":"SetStorageClass""#)
                .body_contains(r#""age":365"#);
            let mut body = bucket_json("new-bucket");
            body["labels"] = json!({"environment": "development", "project": "dust-info"});
            body["lifecycle"] = json!({"rule": [
                {"action": {"type": "SetStorageClass", "storageClass": "NEARLINE"},
                 "condition": {"age": 30, "matchesStorageClass": ["STANDARD"]}},
                {"action": {"type": "SetStorageClass", "storageClass": "COLDLINE"},
                 "condition": {"age": 90, "matchesStorageClass": ["NEARLINE"]}},
                {"action": {"type": "Delete"}, "condition": {"age": 365}}
            ]});
            then.status(200).json_body(body);
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let bucket = storage.get_or_create_bucket("new-bucket").await.unwrap();

    exists.assert_async().await;
    insert.assert_async().await;
    patch.assert_async().await;
    assert_eq!(bucket.labels["project"], "dust-info");
    assert_eq!(bucket.lifecycle.unwrap().rule.len(), 3);
}

#[tokio::test]
async fn test_get_or_create_existing_bucket_is_untouched() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads");
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;
    let insert = server
        .mock_async(|when, then| {
            when.method(POST).path("/storage/v1/b");
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    storage.get_or_create_bucket("dust-uploads").await.unwrap();
    insert.assert_hits_async(0).await;
}

#[tokio::test]
async fn test_get_or_create_conflict_uses_winner() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/storage/v1/b/raced-bucket")
                .query_param("fields", "name");
            then.status(404);
        })
        .await;
    let get = server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/raced-bucket");
            then.status(200).json_body(bucket_json("raced-bucket"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/storage/v1/b");
            then.status(409).json_body(json!({
                "error": {"code": 409, "message": "Your previous request to create the named bucket succeeded and you already own it."}
            }));
        })
        .await;
    let patch = server
        .mock_async(|when, then| {
            when.method(PATCH).path("/storage/v1/b/raced-bucket");
            then.status(200).json_body(bucket_json("raced-bucket"));
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let bucket = storage.get_or_create_bucket("raced-bucket").await.unwrap();
    assert_eq!(bucket.name, "raced-bucket");
    get.assert_async().await;
    patch.assert_hits_async(0).await;
}

#[tokio::test]
async fn test_create_bucket_conflict() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/storage/v1/b")
                .json_body_partial(r#"{"name": "taken-bucket", "location": "US"}"#);
            then.status(409)
                .json_body(json!({"error": {"code": 409, "message": "conflict"}}));
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let err = storage.create_bucket("taken-bucket", "US").await.unwrap_err();
    assert_eq!(err.code(), "BucketAlreadyExists");
}

#[tokio::test]
async fn test_upload_file_media_upload() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads");
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/upload/storage/v1/b/dust-uploads/o")
                .query_param("uploadType", "media")
                .query_param("name", "hello.txt")
                .header("content-type", "text/plain")
                .header("authorization", BEARER)
                .body("hello world");
            then.status(200)
                .json_body(object_json("dust-uploads", "hello.txt", 11, HELLO_MD5));
        })
        .await;

    let path = dir.path().join("hello.txt");
    std::fs::write(&path, "hello world").unwrap();

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let name = storage.upload_file("dust-uploads", &path).await;
    assert_eq!(name.as_deref(), Some("hello.txt"));
    upload.assert_async().await;
}

#[tokio::test]
async fn test_upload_checksum_mismatch() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads");
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/upload/storage/v1/b/dust-uploads/o");
            then.status(200).json_body(object_json(
                "dust-uploads",
                "hello.txt",
                11,
                "1B2M2Y8AsgTpgAmY7PhCfg==",
            ));
        })
        .await;

    let path = dir.path().join("hello.txt");
    std::fs::write(&path, "hello world").unwrap();

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let err = storage.upload_object("dust-uploads", &path).await.unwrap_err();
    assert_eq!(err.code(), "ChecksumMismatch");
    assert!(storage.upload_file("dust-uploads", &path).await.is_none());
}

#[tokio::test]
async fn test_download_file_verifies_and_writes() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads");
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;
    let download = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/storage/v1/b/dust-uploads/o/hello.txt")
                .query_param("alt", "media");
            then.status(200)
                .header("x-goog-hash", "crc32c=yZRlqg==,md5=XrY7u+Ae7tCTyyK7j1rNww==")
                .body("hello world");
        })
        .await;

    let dest = dir.path().join("hello-copy.txt");
    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    storage
        .download_file("dust-uploads", "hello.txt", &dest)
        .await
        .unwrap();

    download.assert_async().await;
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello world");
}

#[tokio::test]
async fn test_download_corrupt_body_not_written() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads");
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads/o/hello.txt");
            then.status(200)
                .header("x-goog-hash", "md5=XrY7u+Ae7tCTyyK7j1rNww==")
                .body("hello w0rld");
        })
        .await;

    let dest = dir.path().join("hello-copy.txt");
    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let err = storage
        .download_file("dust-uploads", "hello.txt", &dest)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ChecksumMismatch");
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_download_missing_object() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads");
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads/o/absent.txt");
            then.status(404)
                .json_body(json!({"error": {"code": 404, "message": "No such object"}}));
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let err = storage
        .download_file("dust-uploads", "absent.txt", &dir.path().join("out"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NoSuchObject");
}

#[tokio::test]
async fn test_delete_file() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads");
            then.status(200).json_body(bucket_json("dust-uploads"));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path("/storage/v1/b/dust-uploads/o/old.log")
                .header("authorization", BEARER);
            then.status(204);
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    storage.delete_file("dust-uploads", "old.log").await.unwrap();
    delete.assert_async().await;
}

#[tokio::test]
async fn test_delete_requires_bucket() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/absent-bucket");
            then.status(404);
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/storage/v1/b/absent-bucket/o/old.log");
            then.status(204);
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let err = storage.delete_file("absent-bucket", "old.log").await.unwrap_err();
    assert_eq!(err.code(), "NoSuchBucket");
    delete.assert_hits_async(0).await;
}

#[tokio::test]
async fn test_list_files_follows_pages() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    let second = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/storage/v1/b/dust-uploads/o")
                .query_param("pageToken", "page-2");
            then.status(200).json_body(json!({
                "kind": "storage#objects",
                "items": [object_json("dust-uploads", "c.txt", 3, HELLO_MD5)]
            }));
        })
        .await;
    let first = server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/dust-uploads/o");
            then.status(200).json_body(json!({
                "kind": "storage#objects",
                "nextPageToken": "page-2",
                "items": [
                    object_json("dust-uploads", "a.txt", 1, HELLO_MD5),
                    object_json("dust-uploads", "b.txt", 2, HELLO_MD5)
                ]
            }));
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    assert_eq!(
        storage.list_files("dust-uploads").await,
        vec!["a.txt", "b.txt", "c.txt"]
    );
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn test_list_files_error_is_empty() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_token(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/storage/v1/b/absent-bucket/o");
            then.status(404);
        })
        .await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    assert!(storage.list_files("absent-bucket").await.is_empty());
    let err = storage.list_objects("absent-bucket", None).await.unwrap_err();
    assert_eq!(err.code(), "NoSuchBucket");
}

#[tokio::test]
async fn test_signed_url_makes_no_requests() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let token = mock_token(&server).await;

    let storage = ServiceAccountStorage::new(test_config(&dir, &server)).unwrap();
    let url = storage.get_signed_url("dust-uploads", "hello.txt").unwrap();

    assert!(url.starts_with(&format!("{}/dust-uploads/hello.txt?", server.base_url())));
    assert!(url.contains("X-Goog-Algorithm=GOOG4-RSA-SHA256"));
    assert!(url.contains("X-Goog-Expires=900"));
    assert!(url.contains(&format!(
        "X-Goog-Credential={}",
        CLIENT_EMAIL.replace('@', "%40")
    )));
    token.assert_hits_async(0).await;
}
