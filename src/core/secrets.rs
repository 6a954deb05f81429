use crate::domain::ports::SecretStore;
use crate::utils::error::Result;

/// Return the given secret store, or connect the default one.
///
/// The default is Google Cloud Secret Manager when the `google` feature is
/// enabled, AWS Secrets Manager otherwise. Both defaults authenticate with
/// the project metadata defaults.
pub async fn default_secret_store(
    secret_store: Option<Box<dyn SecretStore>>,
) -> Result<Box<dyn SecretStore>> {
    match secret_store {
        Some(store) => Ok(store),
        None => connect_default().await,
    }
}

#[cfg(feature = "google")]
async fn connect_default() -> Result<Box<dyn SecretStore>> {
    let auth = crate::adapters::google::GcpAuth::new(None, None);
    Ok(Box::new(
        crate::adapters::google::SecretManager::connect(auth).await?,
    ))
}

#[cfg(all(feature = "amazon", not(feature = "google")))]
async fn connect_default() -> Result<Box<dyn SecretStore>> {
    let auth = crate::adapters::amazon::AwsAuth::new(None);
    Ok(Box::new(
        crate::adapters::amazon::SecretsManager::connect(auth).await?,
    ))
}

#[cfg(not(any(feature = "google", feature = "amazon")))]
async fn connect_default() -> Result<Box<dyn SecretStore>> {
    Err(crate::utils::error::ConnectorError::Config {
        message: "You must enable the `google` or `amazon` feature to use the default secret \
                  store"
            .to_string(),
    })
}
