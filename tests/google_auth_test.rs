#![cfg(feature = "google")]

use cloudglue::GcpAuth;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn write_credentials(path: &std::path::Path, token_uri: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        path,
        json!({
            "type": "authorized_user",
            "client_id": "client",
            "client_secret": "secret",
            "refresh_token": "refresh",
            "token_uri": token_uri,
        })
        .to_string(),
    )
    .unwrap();
}

fn token_mock(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .json_body(json!({"access_token": "test-token", "expires_in": 3600}));
    })
}

#[tokio::test]
async fn test_access_token_from_organization_credentials() {
    let server = MockServer::start();
    let mock = token_mock(&server);
    let gcloud = TempDir::new().unwrap();
    write_credentials(
        &gcloud.path().join("credentials/example-org.json"),
        &server.url("/token"),
    );

    let auth = GcpAuth::new(Some("example.org"), Some("warehouse"))
        .with_gcloud_config(gcloud.path());
    assert_eq!(auth.access_token("scope").await.unwrap(), "test-token");

    // The second call is served from the cache
    assert_eq!(auth.access_token("scope").await.unwrap(), "test-token");
    mock.assert_hits(1);

    // A different scope and a cleared cache both refresh
    assert_eq!(auth.access_token("other-scope").await.unwrap(), "test-token");
    mock.assert_hits(2);
    auth.clear_cache();
    assert_eq!(auth.access_token("scope").await.unwrap(), "test-token");
    mock.assert_hits(3);
}

#[tokio::test]
async fn test_access_token_from_application_default_credentials() {
    let server = MockServer::start();
    let mock = token_mock(&server);
    let gcloud = TempDir::new().unwrap();
    write_credentials(
        &gcloud.path().join("application_default_credentials.json"),
        &server.url("/token"),
    );

    let auth = GcpAuth::new(Some("example.org"), Some("warehouse"))
        .with_gcloud_config(gcloud.path());
    assert_eq!(auth.access_token("scope").await.unwrap(), "test-token");
    mock.assert_hits(1);
}

#[tokio::test]
async fn test_access_token_without_credentials() {
    let gcloud = TempDir::new().unwrap();
    let auth = GcpAuth::new(Some("example.org"), Some("warehouse"))
        .with_gcloud_config(gcloud.path());
    let error = auth.access_token("scope").await.unwrap_err();
    assert!(error.to_string().contains("No credentials found"));
}

#[tokio::test]
async fn test_access_token_error_response() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(400)
            .json_body(json!({"error": "invalid_grant"}));
    });
    let gcloud = TempDir::new().unwrap();
    write_credentials(
        &gcloud.path().join("credentials/example-org.json"),
        &server.url("/token"),
    );

    let auth = GcpAuth::new(Some("example.org"), Some("warehouse"))
        .with_gcloud_config(gcloud.path());
    let error = auth.access_token("scope").await.unwrap_err();
    assert!(error.to_string().contains("invalid_grant"));
}
