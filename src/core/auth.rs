use crate::config::ProjectConfig;
use crate::utils::error::{ConnectorError, Result};
use crate::utils::validation::validate_non_empty_string;

/// Organization resolution shared by every vendor authentication manager.
///
/// The organization is resolved with a small precedence chain: the explicit
/// argument, then the instance default, then the `organization` key of the
/// project metadata file.
#[derive(Debug, Clone, Default)]
pub struct Auth {
    organization: Option<String>,
    config: ProjectConfig,
}

impl Auth {
    pub fn new(organization: Option<&str>) -> Self {
        Self::with_config(organization, ProjectConfig::load())
    }

    pub fn with_config(organization: Option<&str>, config: ProjectConfig) -> Self {
        Self {
            organization: organization.map(str::to_string),
            config,
        }
    }

    pub(crate) fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Return the organization name.
    pub fn organization(&self, organization: Option<&str>) -> Result<String> {
        let organization = organization
            .map(str::to_string)
            .or_else(|| self.organization.clone())
            .or_else(|| self.config.organization.clone())
            .ok_or_else(|| ConnectorError::Config {
                message: "You must provide an organization".to_string(),
            })?;
        validate_non_empty_string("organization", &organization)?;
        Ok(organization)
    }

    /// Return the organization ID: the organization name with dots replaced
    /// by dashes.
    pub fn organization_id(&self, organization: Option<&str>) -> Result<String> {
        Ok(self.organization(organization)?.replace('.', "-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProjectConfig {
        ProjectConfig {
            organization: Some("example.org".to_string()),
            project: None,
            package_name: None,
        }
    }

    #[test]
    fn test_organization() {
        let auth = Auth::with_config(None, config());
        assert_eq!(auth.organization(None).unwrap(), "example.org");
        assert_eq!(auth.organization_id(None).unwrap(), "example-org");

        let auth = Auth::with_config(Some("example.com"), config());
        assert_eq!(auth.organization(None).unwrap(), "example.com");
        assert_eq!(auth.organization(Some("example.net")).unwrap(), "example.net");
    }

    #[test]
    fn test_organization_error() {
        let auth = Auth::with_config(None, ProjectConfig::default());
        let error = auth.organization(None).unwrap_err();
        assert!(error.to_string().contains("must provide an organization"));
    }
}
