#![cfg(feature = "facebook")]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use cloudglue::{ColumnType, ConnectorError, FacebookAds, ReportSpec, Result, SecretStore};
use httpmock::prelude::*;
use serde_json::json;

struct MemoryStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    fn with_credentials() -> Box<dyn SecretStore> {
        let credentials = json!({
            "app_id": "12345",
            "app_secret": "app-secret",
            "access_token": "user-token",
        });
        let mut secrets = HashMap::new();
        secrets.insert("cloudglue-facebook".to_string(), credentials.to_string());
        Box::new(Self {
            secrets: Mutex::new(secrets),
        })
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<String> {
        self.secrets
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ConnectorError::Secret {
                message: format!("Secret \"{key}\" not found"),
            })
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.secrets
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

fn mock_accounts(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(GET)
            .path("/v19.0/me/assigned_ad_accounts")
            .query_param("fields", "id,name")
            .query_param("access_token", "user-token");
        then.status(200).json_body(json!({
            "data": [{"id": "act_1", "name": "Main"}],
            "paging": {"next": server.url("/accounts-page-2")},
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/accounts-page-2");
        then.status(200)
            .json_body(json!({"data": [{"id": "act_2", "name": "Sandbox"}]}));
    })
}

async fn connect(server: &MockServer, account_name: Option<&str>) -> FacebookAds {
    FacebookAds::connect_with(
        account_name,
        "cloudglue-facebook",
        Some(MemoryStore::with_credentials()),
        &server.url(""),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_connect_loads_accounts() {
    let server = MockServer::start();
    let second_page = mock_accounts(&server);

    let facebook = connect(&server, Some("Main")).await;
    second_page.assert();
    assert_eq!(facebook.ad_accounts().len(), 2);
    assert_eq!(facebook.account_id(None).unwrap(), "act_1");
    assert_eq!(facebook.account_id(Some("Sandbox")).unwrap(), "act_2");
}

#[tokio::test]
async fn test_account_id_errors() {
    let server = MockServer::start();
    mock_accounts(&server);

    let facebook = connect(&server, None).await;
    let error = facebook.account_id(None).unwrap_err();
    assert!(error.to_string().contains("must specify the account"));
    let error = facebook.account_id(Some("Unknown")).unwrap_err();
    assert!(error.to_string().contains("not found in your accounts"));
}

#[tokio::test]
async fn test_report() {
    let server = MockServer::start();
    mock_accounts(&server);

    let insights = server.mock(|when, then| {
        when.method(GET)
            .path("/v19.0/act_1/insights")
            .query_param("fields", "campaign_name,spend,impressions,actions")
            .query_param("date_preset", "last_7d")
            .query_param("access_token", "user-token");
        then.status(200).json_body(json!({
            "data": [
                {
                    "campaign_name": "Spring",
                    "spend": "12.34",
                    "impressions": "1000",
                    "actions": [
                        {"action_type": "link_click", "value": "30"},
                        {"action_type": "purchase", "value": "2"},
                    ],
                    "date_start": "2024-01-01",
                    "date_stop": "2024-01-07",
                },
                {
                    "campaign_name": "Brand",
                    "spend": "5.00",
                    "impressions": "400",
                    "date_start": "2024-01-01",
                    "date_stop": "2024-01-07",
                },
            ],
        }));
    });

    let facebook = connect(&server, Some("Main")).await;
    let spec = ReportSpec {
        metrics: vec!["spend".to_string(), "impressions".to_string()],
        dimensions: vec!["campaign_name".to_string()],
        statistics: vec!["actions".to_string()],
        parameters: HashMap::from([("date_preset".to_string(), json!("last_7d"))]),
        ..ReportSpec::default()
    };
    let frame = facebook.report(&spec).await.unwrap();
    insights.assert();

    // Metric columns become numbers and statistics columns are flattened
    // into one column per action type
    assert_eq!(frame.num_rows(), 2);
    let spend = frame.column_index("spend").unwrap();
    assert_eq!(frame.column_type(spend), ColumnType::Float);
    assert_eq!(frame.rows()[0][spend], json!(12.34));
    let impressions = frame.column_index("impressions").unwrap();
    assert_eq!(frame.rows()[1][impressions], json!(400));

    assert_eq!(
        frame.column("actions:link_click").unwrap(),
        vec![&json!(30), &json!(0)]
    );
    assert_eq!(
        frame.column("actions:purchase").unwrap(),
        vec![&json!(2), &json!(0)]
    );

    let date_start = frame.column_index("date_start").unwrap();
    assert_eq!(frame.column_type(date_start), ColumnType::Date);
}

#[tokio::test]
async fn test_report_by_account_id() {
    let server = MockServer::start();
    mock_accounts(&server);

    let insights = server.mock(|when, then| {
        when.method(GET).path("/v19.0/act_42/insights");
        then.status(200).json_body(json!({"data": []}));
    });

    let facebook = connect(&server, None).await;
    let spec = ReportSpec {
        metrics: vec!["spend".to_string()],
        account_id: Some("act_42".to_string()),
        ..ReportSpec::default()
    };
    let frame = facebook.report(&spec).await.unwrap();
    insights.assert();
    assert!(frame.is_empty());
}

#[tokio::test]
async fn test_connect_with_invalid_endpoint() {
    let error = FacebookAds::connect_with(
        None,
        "cloudglue-facebook",
        Some(MemoryStore::with_credentials()),
        "not a url",
    )
    .await
    .unwrap_err();
    assert!(error.to_string().contains("Invalid URL format"));
}
