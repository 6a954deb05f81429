use std::collections::{BTreeSet, HashMap};

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::adapters::http;
use crate::core::secrets::default_secret_store;
use crate::domain::model::Frame;
use crate::domain::ports::SecretStore;
use crate::utils::error::{ConnectorError, Result};
use crate::utils::validation::validate_url;

const SERVICE: &str = "Facebook API";
const DEFAULT_ENDPOINT: &str = "https://graph.facebook.com";
const API_VERSION: &str = "v19.0";

/// Default secret store key holding the Facebook credentials.
pub const DEFAULT_SECRET_KEY: &str = "cloudglue-facebook";

/// An Insights report request.
///
/// Metrics are numeric fields, dimensions are breakdown fields and
/// statistics are ads action statistics fields; `parameters` carries
/// free-form report parameters. The account is selected by ID when given,
/// by name otherwise.
#[derive(Debug, Clone, Default)]
pub struct ReportSpec {
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    pub statistics: Vec<String>,
    pub parameters: HashMap<String, Value>,
    pub account_name: Option<String>,
    pub account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FacebookCredentials {
    app_id: String,
    app_secret: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    data: Vec<serde_json::Map<String, Value>>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

/// Facebook Ads connector.
///
/// The session credentials are loaded from the secret store under the given
/// key; the secret must be a string-encoded JSON object with the `app_id`,
/// `app_secret` and `access_token` keys. The assigned ad accounts of the
/// authenticated business user are loaded on connect.
#[derive(Debug)]
pub struct FacebookAds {
    account_name: Option<String>,
    access_token: String,
    appsecret_proof: String,
    endpoint: String,
    http: reqwest::Client,
    ad_accounts: HashMap<String, String>,
}

impl FacebookAds {
    pub async fn connect(
        account_name: Option<&str>,
        secret_store: Option<Box<dyn SecretStore>>,
    ) -> Result<Self> {
        Self::connect_with(account_name, DEFAULT_SECRET_KEY, secret_store, DEFAULT_ENDPOINT).await
    }

    pub async fn connect_with(
        account_name: Option<&str>,
        secret_key: &str,
        secret_store: Option<Box<dyn SecretStore>>,
        endpoint: &str,
    ) -> Result<Self> {
        validate_url("endpoint", endpoint)?;
        let secrets = default_secret_store(secret_store).await?;
        let credentials: FacebookCredentials =
            serde_json::from_str(&secrets.get(secret_key).await?)?;
        tracing::debug!("Using Facebook app \"{}\"", credentials.app_id);

        let mut connector = Self {
            account_name: account_name.map(str::to_string),
            appsecret_proof: appsecret_proof(
                &credentials.app_secret,
                &credentials.access_token,
            )?,
            access_token: credentials.access_token,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: http::client(),
            ad_accounts: HashMap::new(),
        };

        tracing::info!("Loading Facebook Ads accounts");
        let accounts = connector
            .get_paged(
                &format!(
                    "{}/{API_VERSION}/me/assigned_ad_accounts",
                    connector.endpoint
                ),
                &[("fields", "id,name".to_string())],
            )
            .await?;
        connector.ad_accounts = accounts
            .into_iter()
            .filter_map(|account| {
                Some((
                    account.get("name")?.as_str()?.to_string(),
                    account.get("id")?.as_str()?.to_string(),
                ))
            })
            .collect();
        Ok(connector)
    }

    /// The assigned ad accounts, as a name to ID map.
    pub fn ad_accounts(&self) -> &HashMap<String, String> {
        &self.ad_accounts
    }

    /// Return the account ID for a given account name.
    pub fn account_id(&self, account_name: Option<&str>) -> Result<String> {
        let account_name = account_name
            .or(self.account_name.as_deref())
            .ok_or_else(|| ConnectorError::Config {
                message: "You must specify the account".to_string(),
            })?;
        self.ad_accounts
            .get(account_name)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound {
                message: format!("Account \"{account_name}\" not found in your accounts"),
            })
    }

    /// Return an Insights report as a frame.
    ///
    /// Metric columns are converted to numbers and each action-statistics
    /// column is flattened into one numeric `column:action_type` column per
    /// action type, with missing values defaulting to zero.
    pub async fn report(&self, spec: &ReportSpec) -> Result<Frame> {
        let account_id = match &spec.account_id {
            Some(account_id) => account_id.clone(),
            None => self.account_id(spec.account_name.as_deref())?,
        };

        let fields = spec
            .dimensions
            .iter()
            .chain(&spec.metrics)
            .chain(&spec.statistics)
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        let mut params = vec![("fields", fields)];
        for (key, value) in &spec.parameters {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            params.push((key.as_str(), value));
        }

        tracing::info!("Loading Facebook Ads report");
        let records = self
            .get_paged(
                &format!("{}/{API_VERSION}/{account_id}/insights", self.endpoint),
                &params,
            )
            .await?;
        let mut frame = records_to_frame(records)?;

        // 指標欄位轉為數值
        for column in &spec.metrics {
            frame.map_column(column, to_number);
        }
        for column in &spec.statistics {
            flatten_statistics(&mut frame, column)?;
        }
        Ok(frame)
    }

    /// Page through a Graph API listing, following `paging.next`.
    async fn get_paged(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<serde_json::Map<String, Value>>> {
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("access_token", self.access_token.clone()));
        query.push(("appsecret_proof", self.appsecret_proof.clone()));

        let mut records = Vec::new();
        let mut page = 0;
        let mut next: Option<String> = None;
        loop {
            page += 1;
            tracing::debug!("Loading page {page}");
            let request = match &next {
                // `next` links carry the full query string
                Some(next) => self.http.get(next),
                None => self.http.get(url).query(&query),
            };
            let response = http::check_response(SERVICE, request.send().await?).await?;
            let body: Page = response.json().await?;
            records.extend(body.data);
            next = body.paging.and_then(|paging| paging.next);
            if next.is_none() {
                return Ok(records);
            }
        }
    }
}

fn appsecret_proof(app_secret: &str, access_token: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()).map_err(|error| {
        ConnectorError::Auth {
            message: format!("Invalid app secret: {error}"),
        }
    })?;
    mac.update(access_token.as_bytes());
    Ok(mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}

/// Build a frame from the report records, with columns in order of first
/// appearance.
fn records_to_frame(records: Vec<serde_json::Map<String, Value>>) -> Result<Frame> {
    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !columns.iter().any(|column| column == key) {
                columns.push(key.clone());
            }
        }
    }
    let mut frame = Frame::new(columns);
    for record in records {
        let row = frame
            .columns()
            .iter()
            .map(|column| record.get(column).cloned().unwrap_or(Value::Null))
            .collect();
        frame.push_row(row)?;
    }
    Ok(frame)
}

fn to_number(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::String(text) => {
            if let Ok(integer) = text.parse::<i64>() {
                json!(integer)
            } else if let Ok(float) = text.parse::<f64>() {
                json!(float)
            } else {
                value.clone()
            }
        }
        _ => value.clone(),
    }
}

/// Flatten an ads action statistics column into one numeric column per
/// action type.
fn flatten_statistics(frame: &mut Frame, column: &str) -> Result<()> {
    let Some(cells) = frame
        .column(column)
        .map(|cells| cells.into_iter().cloned().collect::<Vec<_>>())
    else {
        return Ok(());
    };

    let mut action_types: BTreeSet<String> = BTreeSet::new();
    for cell in &cells {
        if let Value::Array(actions) = cell {
            for action in actions {
                if let Some(action_type) = action.get("action_type").and_then(Value::as_str) {
                    action_types.insert(action_type.to_string());
                }
            }
        }
    }

    let extracted: Vec<(String, Vec<Value>)> = action_types
        .into_iter()
        .map(|action_type| {
            let values = cells
                .iter()
                .map(|cell| {
                    let value = match cell {
                        Value::Array(actions) => actions
                            .iter()
                            .find(|action| {
                                action.get("action_type").and_then(Value::as_str)
                                    == Some(action_type.as_str())
                            })
                            .and_then(|action| action.get("value"))
                            .cloned(),
                        _ => None,
                    };
                    to_number(&value.unwrap_or(json!(0)))
                })
                .collect();
            (format!("{column}:{action_type}"), values)
        })
        .collect();

    for (name, values) in extracted {
        frame.add_column(&name, values)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appsecret_proof() {
        // HMAC-SHA256 of the token keyed by the app secret, hex-encoded
        let proof = appsecret_proof("secret", "token").unwrap();
        assert_eq!(proof.len(), 64);
        assert!(proof.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(proof, appsecret_proof("secret", "token").unwrap());
        assert_ne!(proof, appsecret_proof("other", "token").unwrap());
    }

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(&json!("42")), json!(42));
        assert_eq!(to_number(&json!("2.5")), json!(2.5));
        assert_eq!(to_number(&json!(7)), json!(7));
        assert_eq!(to_number(&json!("n/a")), json!("n/a"));
    }

    #[test]
    fn test_flatten_statistics() {
        let mut frame = records_to_frame(vec![
            serde_json::from_value(json!({
                "spend": "10.5",
                "actions": [
                    {"action_type": "link_click", "value": "3"},
                    {"action_type": "purchase", "value": "1"},
                ],
            }))
            .unwrap(),
            serde_json::from_value(json!({"spend": "2.0", "actions": null})).unwrap(),
        ])
        .unwrap();

        flatten_statistics(&mut frame, "actions").unwrap();
        assert_eq!(
            frame.columns(),
            &["actions", "spend", "actions:link_click", "actions:purchase"]
        );
        assert_eq!(frame.column("actions:link_click").unwrap(), vec![&json!(3), &json!(0)]);
        assert_eq!(frame.column("actions:purchase").unwrap(), vec![&json!(1), &json!(0)]);
    }
}
