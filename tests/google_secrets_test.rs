#![cfg(feature = "google")]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cloudglue::{GcpAuth, SecretManager, SecretStore};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn auth(server: &MockServer, gcloud: &TempDir) -> GcpAuth {
    let path = gcloud.path().join("credentials/example-org.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        json!({
            "type": "authorized_user",
            "client_id": "client",
            "client_secret": "secret",
            "refresh_token": "refresh",
            "token_uri": server.url("/token"),
        })
        .to_string(),
    )
    .unwrap();
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .json_body(json!({"access_token": "test-token", "expires_in": 3600}));
    });
    GcpAuth::new(Some("example.org"), Some("warehouse")).with_gcloud_config(gcloud.path())
}

async fn store(server: &MockServer, gcloud: &TempDir) -> SecretManager {
    SecretManager::connect(auth(server, gcloud))
        .await
        .unwrap()
        .with_endpoint(&server.url(""))
}

#[tokio::test]
async fn test_get_secret() {
    let server = MockServer::start();
    let gcloud = TempDir::new().unwrap();
    let store = store(&server, &gcloud).await;

    let access = server.mock(|when, then| {
        when.method(GET)
            .path("/projects/warehouse-example-org/secrets/api-key/versions/latest:access")
            .header("authorization", "Bearer test-token");
        then.status(200).json_body(json!({
            "name": "projects/warehouse-example-org/secrets/api-key/versions/1",
            "payload": {
                "data": BASE64.encode("s3cret"),
                "dataCrc32c": crc32c::crc32c(b"s3cret").to_string(),
            },
        }));
    });

    assert_eq!(store.get("api-key").await.unwrap(), "s3cret");
    access.assert();
}

#[tokio::test]
async fn test_get_secret_detects_corruption() {
    let server = MockServer::start();
    let gcloud = TempDir::new().unwrap();
    let store = store(&server, &gcloud).await;

    server.mock(|when, then| {
        when.method(GET)
            .path("/projects/warehouse-example-org/secrets/api-key/versions/latest:access");
        then.status(200).json_body(json!({
            "payload": {"data": BASE64.encode("s3cret"), "dataCrc32c": "1"},
        }));
    });

    let error = store.get("api-key").await.unwrap_err();
    assert!(error.to_string().contains("Checksum mismatch"));
}

#[tokio::test]
async fn test_get_missing_secret() {
    let server = MockServer::start();
    let gcloud = TempDir::new().unwrap();
    let store = store(&server, &gcloud).await;

    server.mock(|when, then| {
        when.method(GET)
            .path("/projects/warehouse-example-org/secrets/api-key/versions/latest:access");
        then.status(404)
            .json_body(json!({"error": {"message": "Secret not found"}}));
    });

    let error = store.get("api-key").await.unwrap_err();
    assert!(error.to_string().contains("Secret not found"));
}

#[tokio::test]
async fn test_set_secret() {
    let server = MockServer::start();
    let gcloud = TempDir::new().unwrap();
    let store = store(&server, &gcloud).await;

    let add_version = server.mock(|when, then| {
        when.method(POST)
            .path("/projects/warehouse-example-org/secrets/api-key:addVersion")
            .json_body_partial(
                json!({"payload": {"data": BASE64.encode("s3cret")}}).to_string(),
            );
        then.status(200).json_body(json!({
            "name": "projects/warehouse-example-org/secrets/api-key/versions/2",
        }));
    });

    store.set("api-key", "s3cret").await.unwrap();
    add_version.assert();
}

#[tokio::test]
async fn test_set_secret_creates_missing_secret() {
    let server = MockServer::start();
    let gcloud = TempDir::new().unwrap();
    let store = store(&server, &gcloud).await;

    let add_version = server.mock(|when, then| {
        when.method(POST)
            .path("/projects/warehouse-example-org/secrets/api-key:addVersion");
        then.status(404)
            .json_body(json!({"error": {"message": "Secret [api-key] not found"}}));
    });
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/projects/warehouse-example-org/secrets")
            .query_param("secretId", "api-key");
        then.status(200).json_body(json!({
            "name": "projects/warehouse-example-org/secrets/api-key",
        }));
    });

    // The retried version add still fails here, but the secret creation
    // request must have been issued in between.
    let error = store.set("api-key", "s3cret").await.unwrap_err();
    assert!(error.to_string().contains("not found"));
    create.assert();
    add_version.assert_hits(2);
}
