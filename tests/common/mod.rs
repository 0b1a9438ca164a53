//! Shared fixtures for the integration tests: a service-account key that
//! points its token endpoint at the mock server, and a matching config.

#![allow(dead_code)]

use std::path::PathBuf;

use httpmock::prelude::*;
use serde_json::json;
use storage_service::Config;
use tempfile::TempDir;

pub const TEST_KEY: &str = include_str!("../fixtures/test-key.pem");
pub const CLIENT_EMAIL: &str = "uploader@dust-info.iam.gserviceaccount.com";
pub const ACCESS_TOKEN: &str = "ya29.test-token";

/// Write a service-account key whose `token_uri` is the mock `/token`.
pub fn write_key(dir: &TempDir, server: &MockServer) -> PathBuf {
    let key = json!({
        "type": "service_account",
        "project_id": "dust-info",
        "private_key_id": "kid-1",
        "private_key": TEST_KEY,
        "client_email": CLIENT_EMAIL,
        "client_id": "1234567890",
        "token_uri": server.url("/token"),
    });
    let path = dir.path().join("service-account.json");
    std::fs::write(&path, key.to_string()).unwrap();
    path
}

/// Config pointed at the mock server, authenticating via the JWT exchange.
pub fn test_config(dir: &TempDir, server: &MockServer) -> Config {
    Config {
        credentials_file: write_key(dir, server).display().to_string(),
        api_endpoint: server.base_url(),
        request_timeout_secs: 5,
        ..Config::default()
    }
}

/// Mock the OAuth token endpoint.
pub async fn mock_token(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/token")
                .body_contains("jwt-bearer")
                .body_contains("assertion=");
            then.status(200).json_body(json!({
                "access_token": ACCESS_TOKEN,
                "expires_in": 3599,
                "token_type": "Bearer"
            }));
        })
        .await
}

/// A bucket resource as the JSON API returns it.
pub fn bucket_json(name: &str) -> serde_json::Value {
    json!({
        "kind": "storage#bucket",
        "id": name,
        "name": name,
        "location": "ASIA-SOUTH1",
        "storageClass": "STANDARD",
        "timeCreated": "2024-02-01T09:30:05.123Z",
        "updated": "2024-02-01T09:30:05.123Z"
    })
}

/// An object resource as the JSON API returns it.
pub fn object_json(bucket: &str, name: &str, size: usize, md5: &str) -> serde_json::Value {
    json!({
        "kind": "storage#object",
        "name": name,
        "bucket": bucket,
        "size": size.to_string(),
        "contentType": "text/plain",
        "md5Hash": md5,
        "generation": "1706779805123456"
    })
}
