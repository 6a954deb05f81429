use crate::utils::error::Result;
use async_trait::async_trait;

/// Uniform key-value contract satisfied by the managed secret stores.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve the secret under the given key.
    async fn get(&self, key: &str) -> Result<String>;

    /// Store a secret under the given key, creating it when necessary.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}
