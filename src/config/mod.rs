use std::path::Path;

use crate::utils::error::Result;

/// Per-project connector defaults.
///
/// Read from the `[package.metadata.cloudglue]` table of the `Cargo.toml` in
/// the working directory; the package `name` serves as the project-name
/// fallback. A missing manifest or table simply yields empty defaults.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub organization: Option<String>,
    pub project: Option<String>,
    pub package_name: Option<String>,
}

impl ProjectConfig {
    /// Load the defaults from `./Cargo.toml`.
    pub fn load() -> Self {
        Self::from_manifest(Path::new("Cargo.toml")).unwrap_or_default()
    }

    /// Load the defaults from a specific manifest file.
    pub fn from_manifest(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let manifest: toml::Value = toml::from_str(&std::fs::read_to_string(path)?)?;
        Ok(Self::from_value(&manifest))
    }

    fn from_value(manifest: &toml::Value) -> Self {
        let package = manifest.get("package");
        let metadata = package
            .and_then(|package| package.get("metadata"))
            .and_then(|metadata| metadata.get("cloudglue"));
        let get = |key: &str| {
            metadata
                .and_then(|table| table.get(key))
                .and_then(|value| value.as_str())
                .map(str::to_string)
        };
        Self {
            organization: get("organization"),
            project: get("project"),
            package_name: package
                .and_then(|package| package.get("name"))
                .and_then(|name| name.as_str())
                .map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_manifest() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [package]
            name = "reporting"
            version = "0.1.0"

            [package.metadata.cloudglue]
            organization = "example.org"
            project = "warehouse"
            "#
        )
        .unwrap();

        let config = ProjectConfig::from_manifest(file.path()).unwrap();
        assert_eq!(config.organization.as_deref(), Some("example.org"));
        assert_eq!(config.project.as_deref(), Some("warehouse"));
        assert_eq!(config.package_name.as_deref(), Some("reporting"));
    }

    #[test]
    fn test_from_manifest_without_metadata() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[package]\nname = \"reporting\"\n").unwrap();

        let config = ProjectConfig::from_manifest(file.path()).unwrap();
        assert_eq!(config.organization, None);
        assert_eq!(config.project, None);
        assert_eq!(config.package_name.as_deref(), Some("reporting"));
    }

    #[test]
    fn test_missing_manifest() {
        let config = ProjectConfig::from_manifest(Path::new("does-not-exist/Cargo.toml")).unwrap();
        assert_eq!(config.organization, None);
        assert_eq!(config.package_name, None);
    }
}
