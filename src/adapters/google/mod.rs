// Google Cloud Platform connectors.

pub mod auth;
pub mod bigquery;
pub mod drive;
pub mod gmail;
pub mod secrets;
pub mod sheets;

pub use auth::GcpAuth;
pub use bigquery::BigQuery;
pub use drive::{Drive, DrivePath};
pub use gmail::{Address, Attachment, Gmail, Label, Message, Query};
pub use secrets::SecretManager;
pub use sheets::Spreadsheet;
