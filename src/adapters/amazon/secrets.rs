use async_trait::async_trait;
use aws_sdk_secretsmanager::error::ProvideErrorMetadata;
use aws_sdk_secretsmanager::Client;

use crate::adapters::amazon::auth::AwsAuth;
use crate::domain::ports::SecretStore;
use crate::utils::error::{ConnectorError, Result};

/// AWS Secrets Manager connector.
pub struct SecretsManager {
    client: Client,
}

impl SecretsManager {
    pub async fn connect(auth: AwsAuth) -> Result<Self> {
        let config = auth.config(None, None).await?;
        Ok(Self {
            client: Client::new(&config),
        })
    }

    /// Wrap an existing client, letting tests or scripts bring their own
    /// endpoint configuration.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for SecretsManager {
    async fn get(&self, key: &str) -> Result<String> {
        tracing::debug!("Loading secret \"{key}\"");
        let response = self
            .client
            .get_secret_value()
            .secret_id(key)
            .send()
            .await
            .map_err(|error| ConnectorError::Secret {
                message: format!("Failed to load secret \"{key}\": {error}"),
            })?;
        response
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| ConnectorError::Secret {
                message: format!("Secret \"{key}\" has no string payload"),
            })
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        tracing::debug!("Storing secret \"{key}\"");
        let result = self
            .client
            .put_secret_value()
            .secret_id(key)
            .secret_string(value)
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(error) if error.code() == Some("ResourceNotFoundException") => {
                tracing::debug!("Creating secret \"{key}\"");
                self.client
                    .create_secret()
                    .name(key)
                    .secret_string(value)
                    .send()
                    .await
                    .map_err(|error| ConnectorError::Secret {
                        message: format!("Failed to create secret \"{key}\": {error}"),
                    })?;
                Ok(())
            }
            Err(error) => Err(ConnectorError::Secret {
                message: format!("Failed to store secret \"{key}\": {error}"),
            }),
        }
    }
}
