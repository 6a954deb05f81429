use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::adapters::google::auth::{GcpAuth, DEFAULT_SCOPE};
use crate::adapters::http;
use crate::domain::ports::SecretStore;
use crate::utils::error::{ConnectorError, Result};

const SERVICE: &str = "Secret Manager";
const DEFAULT_ENDPOINT: &str = "https://secretmanager.googleapis.com/v1";

/// Google Cloud Secret Manager connector.
///
/// Secrets live under `projects/{project_id}/secrets/{key}`; reads access the
/// `latest` version and verify the payload checksum, writes add a version and
/// create the secret first when necessary.
pub struct SecretManager {
    auth: GcpAuth,
    project_id: String,
    endpoint: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretPayload {
    data: String,
    #[serde(default)]
    data_crc32c: Option<String>,
}

impl SecretManager {
    pub async fn connect(auth: GcpAuth) -> Result<Self> {
        let project_id = auth.project_id(None, None)?;
        Ok(Self {
            auth,
            project_id,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            http: http::client(),
        })
    }

    /// Override the API endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn secret_path(&self, key: &str) -> String {
        format!("projects/{}/secrets/{}", self.project_id, key)
    }

    async fn add_version(&self, key: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let token = self.auth.access_token(DEFAULT_SCOPE).await?;
        Ok(self
            .http
            .post(format!(
                "{}/{}:addVersion",
                self.endpoint,
                self.secret_path(key)
            ))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?)
    }

    async fn create_secret(&self, key: &str) -> Result<()> {
        tracing::debug!("Creating secret \"{key}\"");
        let token = self.auth.access_token(DEFAULT_SCOPE).await?;
        let response = self
            .http
            .post(format!(
                "{}/projects/{}/secrets",
                self.endpoint, self.project_id
            ))
            .query(&[("secretId", key)])
            .bearer_auth(token)
            .json(&json!({"replication": {"automatic": {}}}))
            .send()
            .await?;
        http::check_response(SERVICE, response).await?;
        Ok(())
    }
}

#[async_trait]
impl SecretStore for SecretManager {
    async fn get(&self, key: &str) -> Result<String> {
        tracing::debug!("Loading secret \"{key}\"");
        let token = self.auth.access_token(DEFAULT_SCOPE).await?;
        let response = self
            .http
            .get(format!(
                "{}/{}/versions/latest:access",
                self.endpoint,
                self.secret_path(key)
            ))
            .bearer_auth(token)
            .send()
            .await?;
        let response = http::check_response(SERVICE, response).await?;
        let access: AccessResponse = response.json().await?;

        let data = BASE64
            .decode(&access.payload.data)
            .map_err(|error| ConnectorError::Secret {
                message: format!("Could not decode secret \"{key}\": {error}"),
            })?;
        if let Some(expected) = &access.payload.data_crc32c {
            let actual = u64::from(crc32c::crc32c(&data));
            if expected.parse::<u64>().ok() != Some(actual) {
                return Err(ConnectorError::Integrity {
                    message: format!("Checksum mismatch for secret \"{key}\""),
                });
            }
        }
        String::from_utf8(data).map_err(|error| ConnectorError::Secret {
            message: format!("Secret \"{key}\" is not valid UTF-8: {error}"),
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        tracing::debug!("Storing secret \"{key}\"");
        let body = json!({
            "payload": {
                "data": BASE64.encode(value.as_bytes()),
                "dataCrc32c": crc32c::crc32c(value.as_bytes()).to_string(),
            }
        });

        let response = self.add_version(key, &body).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            self.create_secret(key).await?;
            let response = self.add_version(key, &body).await?;
            http::check_response(SERVICE, response).await?;
        } else {
            http::check_response(SERVICE, response).await?;
        }
        Ok(())
    }
}
