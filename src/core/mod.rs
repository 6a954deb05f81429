pub mod auth;
pub mod secrets;

pub use crate::domain::model::{ColumnType, Frame};
pub use crate::domain::ports::SecretStore;
pub use crate::utils::error::Result;
pub use auth::Auth;
pub use secrets::default_secret_store;
