use chrono::DateTime;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::adapters::google::auth::{GcpAuth, DEFAULT_SCOPE};
use crate::adapters::http;
use crate::domain::model::{ColumnType, Frame};
use crate::utils::error::{ConnectorError, Result};

const SERVICE: &str = "BigQuery";
const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";
const DEFAULT_UPLOAD_ENDPOINT: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";

/// Google BigQuery connector.
///
/// Table names are `dataset.table`; the project is the authentication
/// manager's project ID.
pub struct BigQuery {
    auth: GcpAuth,
    project_id: String,
    endpoint: String,
    upload_endpoint: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TableInfo {
    schema: TableSchema,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Debug, Deserialize)]
struct TableField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableDataList {
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    job_reference: Option<JobReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
}

impl BigQuery {
    pub fn connect(auth: GcpAuth) -> Result<Self> {
        let project_id = auth.project_id(None, None)?;
        Ok(Self {
            auth,
            project_id,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            upload_endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
            http: http::client(),
        })
    }

    /// Override the API endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Override the upload API endpoint.
    pub fn with_upload_endpoint(mut self, endpoint: &str) -> Self {
        self.upload_endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Return the given table as a frame.
    pub async fn get_table(&self, name: &str) -> Result<Frame> {
        tracing::info!("Loading data from BigQuery table \"{name}\"");
        let (dataset, table) = split_table_name(name)?;
        let table_url = format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.endpoint, self.project_id, dataset, table
        );

        let token = self.auth.access_token(DEFAULT_SCOPE).await?;
        let response = self.http.get(&table_url).bearer_auth(&token).send().await?;
        let response = http::check_response(SERVICE, response).await?;
        let info: TableInfo = response.json().await?;

        let mut frame = Frame::new(
            info.schema
                .fields
                .iter()
                .map(|field| field.name.clone())
                .collect(),
        );

        let mut page = 0;
        let mut page_token: Option<String> = None;
        loop {
            page += 1;
            tracing::debug!("Loading page {page}");
            let mut request = self
                .http
                .get(format!("{table_url}/data"))
                .bearer_auth(&token);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response = http::check_response(SERVICE, request.send().await?).await?;
            let data: TableDataList = response.json().await?;

            for row in data.rows {
                let values = row
                    .f
                    .iter()
                    .zip(&info.schema.fields)
                    .map(|(cell, field)| convert_cell(&cell.v, &field.field_type))
                    .collect();
                frame.push_row(values)?;
            }
            page_token = data.page_token;
            if page_token.is_none() {
                return Ok(frame);
            }
        }
    }

    /// Upload a frame to a table. Existing data in the table is dropped.
    ///
    /// Starts a truncating load job from newline-delimited JSON and returns
    /// without waiting for its completion.
    pub async fn set_table(&self, name: &str, data: &Frame) -> Result<()> {
        tracing::info!("Uploading data to BigQuery table \"{name}\"");
        let (dataset, table) = split_table_name(name)?;

        let fields = data
            .columns()
            .iter()
            .zip(data.column_types())
            .map(|(column, column_type)| {
                json!({"name": column, "type": field_type(column_type)})
            })
            .collect::<Vec<_>>();
        let metadata = json!({
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": self.project_id,
                        "datasetId": dataset,
                        "tableId": table,
                    },
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": "WRITE_TRUNCATE",
                    "schema": {"fields": fields},
                },
            },
        });

        // 逐行序列化為 NDJSON
        let mut ndjson = String::new();
        for row in data.rows() {
            let record: Map<String, Value> = data
                .columns()
                .iter()
                .zip(row)
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect();
            ndjson.push_str(&serde_json::to_string(&Value::Object(record))?);
            ndjson.push('\n');
        }

        let token = self.auth.access_token(DEFAULT_SCOPE).await?;
        let response = self
            .http
            .post(format!(
                "{}/projects/{}/jobs",
                self.upload_endpoint, self.project_id
            ))
            .query(&[("uploadType", "multipart")])
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", http::MULTIPART_BOUNDARY),
            )
            .body(http::multipart_related(
                &metadata.to_string(),
                "application/octet-stream",
                ndjson.as_bytes(),
            ))
            .send()
            .await?;
        let response = http::check_response(SERVICE, response).await?;
        let job: JobResponse = response.json().await?;
        if let Some(reference) = job.job_reference {
            tracing::debug!("Started load job \"{}\"", reference.job_id);
        }
        Ok(())
    }
}

fn split_table_name(name: &str) -> Result<(&str, &str)> {
    name.split_once('.')
        .filter(|(dataset, table)| !dataset.is_empty() && !table.is_empty())
        .ok_or_else(|| ConnectorError::InvalidConfigValue {
            field: "table".to_string(),
            value: name.to_string(),
            reason: "Table names must have the form `dataset.table`".to_string(),
        })
}

fn field_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "INTEGER",
        ColumnType::Float => "FLOAT",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Date => "DATE",
        ColumnType::DateTime => "TIMESTAMP",
        ColumnType::Text => "STRING",
    }
}

/// Convert a `tabledata.list` cell (stringly-typed) to a JSON value.
fn convert_cell(value: &Value, field_type: &str) -> Value {
    let text = match value {
        Value::Null => return Value::Null,
        Value::String(text) => text.as_str(),
        other => return other.clone(),
    };
    match field_type {
        "INTEGER" | "INT64" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "BOOLEAN" | "BOOL" => match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => Value::String(other.to_string()),
        },
        "TIMESTAMP" => text
            .parse::<f64>()
            .ok()
            .and_then(|seconds| {
                DateTime::from_timestamp(
                    seconds.trunc() as i64,
                    (seconds.fract() * 1e9).round() as u32,
                )
            })
            .map(|timestamp| {
                Value::String(timestamp.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
            })
            .unwrap_or_else(|| Value::String(text.to_string())),
        _ => Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_table_name() {
        assert_eq!(split_table_name("sales.orders").unwrap(), ("sales", "orders"));
        assert!(split_table_name("orders").is_err());
        assert!(split_table_name(".orders").is_err());
    }

    #[test]
    fn test_convert_cell() {
        assert_eq!(convert_cell(&json!("42"), "INTEGER"), json!(42));
        assert_eq!(convert_cell(&json!("2.5"), "FLOAT"), json!(2.5));
        assert_eq!(convert_cell(&json!("true"), "BOOLEAN"), json!(true));
        assert_eq!(convert_cell(&json!("hello"), "STRING"), json!("hello"));
        assert_eq!(convert_cell(&Value::Null, "INTEGER"), Value::Null);
        assert_eq!(
            convert_cell(&json!("1704103200.0"), "TIMESTAMP"),
            json!("2024-01-01 10:00:00")
        );
    }
}
