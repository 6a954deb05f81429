use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::adapters::http;
use crate::config::ProjectConfig;
use crate::core::auth::Auth;
use crate::utils::error::{ConnectorError, Result};

/// Scope used when a connector does not request a narrower one.
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Google Cloud Platform authentication manager.
///
/// Resolves the organization and project with the usual precedence chain
/// (explicit argument, instance default, project metadata) and turns the
/// local credential files into access tokens. The per-organization credential
/// file `credentials/{organization_id}.json` under the gcloud configuration
/// directory wins over the application default credentials. Tokens are cached
/// per (organization, project, scope) until they expire.
#[derive(Debug, Clone)]
pub struct GcpAuth {
    auth: Auth,
    project: Option<String>,
    gcloud_config: PathBuf,
    http: reqwest::Client,
    tokens: Arc<Mutex<HashMap<(String, String, String), CachedToken>>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CredentialsFile {
    #[serde(rename = "authorized_user")]
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default)]
        token_uri: Option<String>,
    },
    #[serde(rename = "service_account")]
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        token_uri: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct BearerClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl GcpAuth {
    pub fn new(organization: Option<&str>, project: Option<&str>) -> Self {
        Self::with_config(organization, project, ProjectConfig::load())
    }

    pub fn with_config(
        organization: Option<&str>,
        project: Option<&str>,
        config: ProjectConfig,
    ) -> Self {
        Self {
            auth: Auth::with_config(organization, config),
            project: project.map(str::to_string),
            gcloud_config: default_gcloud_config(),
            http: http::client(),
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Override the gcloud configuration directory.
    pub fn with_gcloud_config(mut self, path: &Path) -> Self {
        self.gcloud_config = path.to_path_buf();
        self
    }

    pub fn clear_cache(&self) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.clear();
        }
    }

    pub fn organization(&self, organization: Option<&str>) -> Result<String> {
        self.auth.organization(organization)
    }

    pub fn organization_id(&self, organization: Option<&str>) -> Result<String> {
        self.auth.organization_id(organization)
    }

    /// Return the project name.
    ///
    /// Defaults to the `project` value of the project metadata, then to the
    /// package name.
    pub fn project(&self, project: Option<&str>) -> Result<String> {
        project
            .map(str::to_string)
            .or_else(|| self.project.clone())
            .or_else(|| self.auth.config().project.clone())
            .or_else(|| self.auth.config().package_name.clone())
            .ok_or_else(|| ConnectorError::Config {
                message: "You must provide a project".to_string(),
            })
    }

    /// Return the project ID, constructed as `{project}-{organization_id}`.
    pub fn project_id(&self, organization: Option<&str>, project: Option<&str>) -> Result<String> {
        Ok(format!(
            "{}-{}",
            self.project(project)?,
            self.organization_id(organization)?
        ))
    }

    /// Path to the organization credentials, or `None` when the file does not
    /// exist. Constructed as `credentials/{organization_id}.json` under the
    /// gcloud configuration directory.
    pub fn credentials_path(&self, organization: Option<&str>) -> Result<Option<PathBuf>> {
        let path = self
            .gcloud_config
            .join("credentials")
            .join(self.organization_id(organization)?)
            .with_extension("json");
        Ok(path.exists().then_some(path))
    }

    fn application_default_credentials_path(&self) -> Option<PathBuf> {
        if let Some(path) = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS") {
            return Some(PathBuf::from(path));
        }
        let path = self.gcloud_config.join("application_default_credentials.json");
        path.exists().then_some(path)
    }

    /// Return an access token for the given scope.
    ///
    /// Uses the organization credentials when they exist and the application
    /// default credentials otherwise.
    pub async fn access_token(&self, scope: &str) -> Result<String> {
        let organization = self.organization(None)?;
        let project = self.project(None)?;
        tracing::debug!(
            "Loading credentials for organization \"{organization}\" and project \"{project}\""
        );

        let key = (organization.clone(), project, scope.to_string());
        if let Some(token) = self.cached_token(&key) {
            tracing::debug!("Using cached token");
            return Ok(token);
        }

        let path = match self.credentials_path(Some(&organization))? {
            Some(path) => {
                tracing::debug!("Loading credentials from file \"{}\"", path.display());
                path
            }
            None => {
                tracing::debug!("Loading application default credentials");
                self.application_default_credentials_path().ok_or_else(|| {
                    ConnectorError::Auth {
                        message: format!(
                            "No credentials found for organization \"{organization}\""
                        ),
                    }
                })?
            }
        };

        let credentials: CredentialsFile =
            serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        let (token, expires_in) = self.fetch_token(&credentials, scope).await?;

        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(
                key,
                CachedToken {
                    token: token.clone(),
                    expires_at: Instant::now()
                        + Duration::from_secs(expires_in)
                            .saturating_sub(TOKEN_EXPIRY_SLACK),
                },
            );
        }
        Ok(token)
    }

    fn cached_token(&self, key: &(String, String, String)) -> Option<String> {
        let tokens = self.tokens.lock().ok()?;
        let cached = tokens.get(key)?;
        (cached.expires_at > Instant::now()).then(|| cached.token.clone())
    }

    async fn fetch_token(
        &self,
        credentials: &CredentialsFile,
        scope: &str,
    ) -> Result<(String, u64)> {
        let response = match credentials {
            CredentialsFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri,
            } => {
                let token_uri = token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                tracing::debug!("Refreshing user credentials against \"{token_uri}\"");
                self.http
                    .post(token_uri)
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("refresh_token", refresh_token.as_str()),
                    ])
                    .send()
                    .await?
            }
            CredentialsFile::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => {
                let token_uri = token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                tracing::debug!(
                    "Requesting service account token for \"{client_email}\" against \
                     \"{token_uri}\""
                );
                let assertion = bearer_assertion(client_email, private_key, token_uri, scope)?;
                self.http
                    .post(token_uri)
                    .form(&[
                        ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                        ("assertion", assertion.as_str()),
                    ])
                    .send()
                    .await?
            }
        };

        let response = http::check_response("Token endpoint", response).await?;
        let token: TokenResponse = response.json().await?;
        Ok((token.access_token, token.expires_in.unwrap_or(3600)))
    }
}

fn default_gcloud_config() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("gcloud")
}

fn bearer_assertion(
    client_email: &str,
    private_key: &str,
    token_uri: &str,
    scope: &str,
) -> Result<String> {
    let issued_at = chrono::Utc::now().timestamp();
    let claims = BearerClaims {
        iss: client_email,
        scope,
        aud: token_uri,
        iat: issued_at,
        exp: issued_at + 3600,
    };
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|error| {
        ConnectorError::Auth {
            message: format!("Invalid service account key: {error}"),
        }
    })?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|error| {
        ConnectorError::Auth {
            message: format!("Could not sign service account assertion: {error}"),
        }
    })
}
