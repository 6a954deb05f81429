use std::collections::HashSet;
use std::path::{Path, PathBuf};

use aws_config::{BehaviorVersion, Region, SdkConfig};
use regex::Regex;

use crate::config::ProjectConfig;
use crate::core::auth::Auth;
use crate::utils::error::Result;

/// Amazon Web Services authentication manager.
///
/// Named profiles are read from the shared credentials file; the profile
/// matching the organization ID is used when it exists, the default provider
/// chain otherwise.
#[derive(Debug, Clone)]
pub struct AwsAuth {
    auth: Auth,
    profiles: HashSet<String>,
}

impl AwsAuth {
    pub fn new(organization: Option<&str>) -> Self {
        Self::with_credentials_file(organization, &default_credentials_path())
    }

    pub fn with_credentials_file(organization: Option<&str>, credentials: &Path) -> Self {
        Self {
            auth: Auth::new(organization),
            profiles: load_profiles(credentials),
        }
    }

    pub(crate) fn with_config(
        organization: Option<&str>,
        credentials: &Path,
        config: ProjectConfig,
    ) -> Self {
        Self {
            auth: Auth::with_config(organization, config),
            profiles: load_profiles(credentials),
        }
    }

    /// The available named profiles.
    pub fn profiles(&self) -> &HashSet<String> {
        &self.profiles
    }

    pub fn organization(&self, organization: Option<&str>) -> Result<String> {
        self.auth.organization(organization)
    }

    pub fn organization_id(&self, organization: Option<&str>) -> Result<String> {
        self.auth.organization_id(organization)
    }

    /// Return the profile name (same as the organization ID), or `None` when
    /// no such named profile exists.
    pub fn profile(&self, organization: Option<&str>) -> Result<Option<String>> {
        let organization_id = self.organization_id(organization)?;
        let profile = self.profiles.contains(&organization_id).then_some(organization_id);
        if let Some(profile) = &profile {
            tracing::debug!("Using named profile \"{profile}\"");
        }
        Ok(profile)
    }

    /// Return an SDK configuration that uses the named profile credentials
    /// when they exist.
    pub async fn config(
        &self,
        organization: Option<&str>,
        region: Option<&str>,
    ) -> Result<SdkConfig> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(profile) = self.profile(organization)? {
            loader = loader.profile_name(&profile);
        }
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        Ok(loader.load().await)
    }
}

fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("~"))
        .join(".aws")
        .join("credentials")
}

fn load_profiles(credentials: &Path) -> HashSet<String> {
    let Ok(contents) = std::fs::read_to_string(credentials) else {
        tracing::debug!(
            "Named profile credentials file \"{}\" does not exist",
            credentials.display()
        );
        return HashSet::new();
    };
    let section = Regex::new(r"^\s*\[([^\]]+)\]\s*$").unwrap();
    contents
        .lines()
        .filter_map(|line| section.captures(line))
        .map(|captures| captures[1].trim().to_string())
        .collect()
}
