use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::adapters::google::auth::GcpAuth;
use crate::adapters::http;
use crate::utils::error::{ConnectorError, Result};

const SERVICE: &str = "Gmail API";
const DEFAULT_ENDPOINT: &str = "https://gmail.googleapis.com/gmail/v1";

/// Scope the credentials must be authorized for.
pub const SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// A Gmail label.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Label {
    pub id: String,
    pub name: Option<String>,
}

/// An email address with an optional display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Address {
    pub email: String,
    pub display_name: Option<String>,
}

/// An email message attachment descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub filename: String,
    pub mime_type: Option<String>,
}

/// An email message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    pub sender: Option<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub subject: Option<String>,
    pub plain_text: Option<String>,
    pub html_text: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub labels: Vec<Label>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    fn add_part(&mut self, part: &MessagePart) -> Result<()> {
        match part.mime_type.as_deref() {
            Some("text/plain") => self.plain_text = decode_part_body(part)?,
            Some("text/html") => self.html_text = decode_part_body(part)?,
            Some("multipart/alternative") => {
                for subpart in &part.parts {
                    self.add_part(subpart)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// A Gmail search query.
///
/// Renders to the search syntax described at
/// <https://support.google.com/mail/answer/7190>.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: String,
    pub sender: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub subject: Option<String>,
    pub timestamp_from: Option<DateTime<Utc>>,
    pub timestamp_to: Option<DateTime<Utc>>,
    pub label: Option<String>,
    pub labels: Vec<Label>,
    pub attachment: bool,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query: Vec<String> = Vec::new();
        if !self.text.is_empty() {
            query.push(self.text.clone());
        }
        if let Some(sender) = &self.sender {
            query.push(format!("from:{sender}"));
        }
        if let Some(to) = &self.to {
            query.push(format!("to:{to}"));
        }
        if let Some(cc) = &self.cc {
            query.push(format!("cc:{cc}"));
        }
        if let Some(subject) = &self.subject {
            query.push(format!("subject:({subject})"));
        }
        if let Some(timestamp) = &self.timestamp_from {
            query.push(format!("after:{}", timestamp.timestamp()));
        }
        if let Some(timestamp) = &self.timestamp_to {
            query.push(format!("before:{}", timestamp.timestamp()));
        }
        if let Some(label) = &self.label {
            query.push(format!("label:({label})"));
        }
        if self.attachment {
            query.push("has:attachment".to_string());
        }
        write!(f, "{}", query.join(" "))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelList {
    #[serde(default)]
    labels: Vec<LabelResource>,
}

#[derive(Debug, Deserialize)]
struct LabelResource {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullMessage {
    id: String,
    thread_id: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    internal_date: Option<String>,
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    mime_type: Option<String>,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<MessageHeader>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct MessageHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    data: Option<String>,
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: String,
}

/// Gmail connector, reading the mailbox of a single user (`me` by default).
pub struct Gmail {
    auth: GcpAuth,
    endpoint: String,
    user_id: String,
    http: reqwest::Client,
}

impl Gmail {
    pub fn connect(auth: GcpAuth) -> Self {
        Self {
            auth,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_id: "me".to_string(),
            http: http::client(),
        }
    }

    /// Override the API endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Read another user's mailbox.
    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = user_id.to_string();
        self
    }

    fn user_url(&self, suffix: &str) -> String {
        format!("{}/users/{}/{suffix}", self.endpoint, self.user_id)
    }

    /// Load the labels of the mailbox.
    pub async fn labels(&self) -> Result<Vec<Label>> {
        let token = self.auth.access_token(SCOPE).await?;
        let response = self
            .http
            .get(self.user_url("labels"))
            .bearer_auth(token)
            .send()
            .await?;
        let response = http::check_response(SERVICE, response).await?;
        let labels: LabelList = response.json().await?;
        Ok(labels
            .labels
            .into_iter()
            .map(|label| Label {
                id: label.id,
                name: Some(label.name),
            })
            .collect())
    }

    /// Load the messages that match a given query. Only the message and
    /// thread IDs are filled in; use [`Gmail::message`] for the rest.
    pub async fn messages(&self, query: &Query) -> Result<Vec<Message>> {
        tracing::info!("Loading messages of user \"{}\"", self.user_id);
        let query_str = query.to_string();
        tracing::debug!("Using query: {query_str}");

        let token = self.auth.access_token(SCOPE).await?;
        let mut messages: Vec<MessageRef> = Vec::new();
        let mut page = 0;
        let mut page_token: Option<String> = None;
        loop {
            page += 1;
            tracing::debug!("Loading page {page}");
            let mut params = vec![
                ("q", query_str.clone()),
                ("includeSpamTrash", "false".to_string()),
                ("fields", "nextPageToken, messages(id, threadId)".to_string()),
            ];
            for label in &query.labels {
                params.push(("labelIds", label.id.clone()));
            }
            if let Some(token_value) = &page_token {
                params.push(("pageToken", token_value.clone()));
            }
            let response = self
                .http
                .get(self.user_url("messages"))
                .query(&params)
                .bearer_auth(&token)
                .send()
                .await?;
            let response = http::check_response(SERVICE, response).await?;
            let list: MessageList = response.json().await?;
            messages.extend(list.messages);
            page_token = list.next_page_token;
            if page_token.is_none() {
                return Ok(messages
                    .into_iter()
                    .map(|message| Message {
                        id: message.id,
                        thread_id: message.thread_id,
                        ..Message::default()
                    })
                    .collect());
            }
        }
    }

    /// Load a specific message.
    pub async fn message(&self, message: &Message) -> Result<Message> {
        tracing::info!(
            "Loading message \"{}\" of user \"{}\"",
            message.id,
            self.user_id
        );
        let token = self.auth.access_token(SCOPE).await?;
        let response = self
            .http
            .get(self.user_url(&format!("messages/{}", message.id)))
            .query(&[("format", "full")])
            .bearer_auth(token)
            .send()
            .await?;
        let response = http::check_response(SERVICE, response).await?;
        let full: FullMessage = response.json().await?;

        let mut message = Message {
            id: full.id.clone(),
            thread_id: full.thread_id,
            timestamp: full
                .internal_date
                .and_then(|date| date.parse::<i64>().ok())
                .and_then(|millis| DateTime::from_timestamp_millis(millis)),
            labels: full
                .label_ids
                .into_iter()
                .map(|id| Label { id, name: None })
                .collect(),
            ..Message::default()
        };

        let Some(payload) = full.payload else {
            return Ok(message);
        };

        // Process headers
        for header in &payload.headers {
            match header.name.to_lowercase().as_str() {
                "from" => message.sender = parse_addresses(&header.value).into_iter().next(),
                "to" => message.to = parse_addresses(&header.value),
                "cc" => message.cc = parse_addresses(&header.value),
                "subject" => message.subject = Some(header.value.clone()),
                _ => {}
            }
        }

        // Process message parts
        for part in &payload.parts {
            let attachment_id = part
                .body
                .as_ref()
                .and_then(|body| body.attachment_id.clone());
            if let Some(attachment_id) = attachment_id {
                message.attachments.push(Attachment {
                    id: attachment_id,
                    message_id: full.id.clone(),
                    filename: part.filename.clone(),
                    mime_type: part.mime_type.clone(),
                });
            } else {
                message.add_part(part)?;
            }
        }

        Ok(message)
    }

    /// Download an attachment and return the path to it.
    ///
    /// Refuses to overwrite existing files unless `overwrite` is set;
    /// `Some(false)` skips the download instead.
    pub async fn download_attachment(
        &self,
        attachment: &Attachment,
        dst: &Path,
        filename: Option<&str>,
        overwrite: Option<bool>,
    ) -> Result<PathBuf> {
        let dst_path = dst.join(filename.unwrap_or(&attachment.filename));
        if dst_path.exists() {
            match overwrite {
                None => {
                    return Err(ConnectorError::Config {
                        message: format!(
                            "Destination file \"{}\" already exists",
                            dst_path.display()
                        ),
                    })
                }
                Some(false) => {
                    tracing::info!(
                        "Skipping downloading existing file \"{}\"",
                        dst_path.display()
                    );
                    return Ok(dst_path);
                }
                Some(true) => {}
            }
        }

        tracing::info!(
            "Downloading attachment of message \"{}\" of user \"{}\" to \"{}\"",
            attachment.message_id,
            self.user_id,
            dst_path.display()
        );
        tracing::debug!("Attachment ID: {}", attachment.id);
        let token = self.auth.access_token(SCOPE).await?;
        let response = self
            .http
            .get(self.user_url(&format!(
                "messages/{}/attachments/{}",
                attachment.message_id, attachment.id
            )))
            .bearer_auth(token)
            .send()
            .await?;
        let response = http::check_response(SERVICE, response).await?;
        let body: AttachmentBody = response.json().await?;

        tracing::info!("Saving attachment to \"{}\"", dst_path.display());
        tokio::fs::create_dir_all(dst).await?;
        tokio::fs::write(&dst_path, decode_urlsafe(&body.data)?).await?;
        Ok(dst_path)
    }
}

fn decode_part_body(part: &MessagePart) -> Result<Option<String>> {
    let Some(data) = part.body.as_ref().and_then(|body| body.data.as_ref()) else {
        return Ok(None);
    };
    let decoded = decode_urlsafe(data)?;
    Ok(Some(String::from_utf8(decoded).map_err(|error| {
        ConnectorError::Config {
            message: format!("Message part is not valid UTF-8: {error}"),
        }
    })?))
}

fn decode_urlsafe(data: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(data)
        .or_else(|_| URL_SAFE_NO_PAD.decode(data))
        .map_err(|error| ConnectorError::Config {
            message: format!("Invalid base64 payload: {error}"),
        })
}

fn parse_addresses(value: &str) -> Vec<Address> {
    let re = Regex::new(r#""?([^"<>,]*)"?\s*<([^>]+)>|([^\s,<>]+@[^\s,<>]+)"#).unwrap();
    re.captures_iter(value)
        .map(|captures| {
            if let Some(email) = captures.get(3) {
                Address {
                    email: email.as_str().to_string(),
                    display_name: None,
                }
            } else {
                Address {
                    email: captures[2].trim().to_string(),
                    display_name: captures
                        .get(1)
                        .map(|name| name.as_str().trim().to_string())
                        .filter(|name| !name.is_empty()),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_query_rendering() {
        let query = Query {
            text: "report".to_string(),
            sender: Some("jane@example.org".to_string()),
            subject: Some("weekly numbers".to_string()),
            timestamp_from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            attachment: true,
            ..Query::default()
        };
        assert_eq!(
            query.to_string(),
            "report from:jane@example.org subject:(weekly numbers) after:1704067200 \
             has:attachment"
        );
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(Query::default().to_string(), "");
    }

    #[test]
    fn test_parse_addresses() {
        let addresses = parse_addresses("Jane Doe <jane@example.org>, bob@example.org");
        assert_eq!(
            addresses,
            vec![
                Address {
                    email: "jane@example.org".to_string(),
                    display_name: Some("Jane Doe".to_string()),
                },
                Address {
                    email: "bob@example.org".to_string(),
                    display_name: None,
                },
            ]
        );
    }

    #[test]
    fn test_add_part_multipart_alternative() {
        let part: MessagePart = serde_json::from_value(serde_json::json!({
            "mimeType": "multipart/alternative",
            "parts": [
                {"mimeType": "text/plain", "body": {"data": URL_SAFE.encode("hello")}},
                {"mimeType": "text/html", "body": {"data": URL_SAFE.encode("<p>hello</p>")}},
            ],
        }))
        .unwrap();
        let mut message = Message::new("m1");
        message.add_part(&part).unwrap();
        assert_eq!(message.plain_text.as_deref(), Some("hello"));
        assert_eq!(message.html_text.as_deref(), Some("<p>hello</p>"));
    }
}
