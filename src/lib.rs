pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "amazon")]
pub use crate::adapters::amazon::{AwsAuth, SecretsManager};

#[cfg(feature = "facebook")]
pub use crate::adapters::facebook::{FacebookAds, ReportSpec};

#[cfg(feature = "google")]
pub use crate::adapters::google::{
    BigQuery, Drive, DrivePath, GcpAuth, Gmail, SecretManager, Spreadsheet,
};

pub use crate::config::ProjectConfig;
pub use crate::core::{default_secret_store, Auth, ColumnType, Frame, SecretStore};
pub use crate::utils::error::{ConnectorError, Result};
