use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("API request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("{service} returned HTTP {status}: {message}")]
    Vendor {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metadata file error: {0}")]
    Metadata(#[from] toml::de::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Authentication error: {message}")]
    Auth { message: String },

    #[error("Secret store error: {message}")]
    Secret { message: String },

    #[error("Data integrity error: {message}")]
    Integrity { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
