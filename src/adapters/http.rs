use std::time::Duration;

use serde::Deserialize;

use crate::utils::error::{ConnectorError, Result};

/// HTTP client shared by the reqwest-based connectors.
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("cloudglue/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .unwrap_or_default()
}

#[cfg(feature = "google")]
pub(crate) const MULTIPART_BOUNDARY: &str = "cloudglue-upload";

/// Assemble a `multipart/related` body (metadata part + media part), the
/// layout the Google upload endpoints expect.
#[cfg(feature = "google")]
pub(crate) fn multipart_related(metadata: &str, media_type: &str, media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.len() + 256);
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n\
             {metadata}\r\n--{MULTIPART_BOUNDARY}\r\nContent-Type: {media_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Object { message: String },
    Message(String),
}

/// Map a non-success response to a vendor error, extracting the `error`
/// message from the body when there is one.
pub(crate) async fn check_response(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            error: ErrorDetail::Object { message },
        }) => message,
        Ok(ErrorBody {
            error: ErrorDetail::Message(message),
        }) => message,
        Err(_) => body,
    };
    Err(ConnectorError::Vendor {
        service,
        status: status.as_u16(),
        message,
    })
}
