use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapters::google::auth::GcpAuth;
use crate::adapters::http;
use crate::domain::model::{ColumnType, Frame};
use crate::utils::error::{ConnectorError, Result};

const SERVICE: &str = "Sheets API";
const DEFAULT_ENDPOINT: &str = "https://sheets.googleapis.com/v4";

/// Scope the credentials must be authorized for.
pub const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Google Sheets connector, bound to a single spreadsheet.
pub struct Spreadsheet {
    key: String,
    auth: GcpAuth,
    endpoint: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetInfo {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<Reply>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reply {
    add_sheet: Option<AddSheetReply>,
}

#[derive(Debug, Deserialize)]
struct AddSheetReply {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl Spreadsheet {
    /// Create a connector for the spreadsheet with the given key.
    pub fn connect(key: &str, auth: GcpAuth) -> Self {
        Self {
            key: key.to_string(),
            auth,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            http: http::client(),
        }
    }

    /// Override the API endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn values_url(&self, name: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.endpoint)?;
        url.path_segments_mut()
            .map_err(|_| ConnectorError::Config {
                message: format!("Invalid endpoint \"{}\"", self.endpoint),
            })?
            .extend(["spreadsheets", self.key.as_str(), "values", name]);
        Ok(url)
    }

    /// Add a new sheet to the spreadsheet and return its sheet ID.
    pub async fn add_sheet(&self, name: &str, grid_properties: Option<Value>) -> Result<i64> {
        tracing::info!("Adding sheet \"{name}\"");
        let properties = json!({"title": name, "gridProperties": grid_properties});
        let response = self
            .batch_update(vec![json!({"addSheet": {"properties": properties}})])
            .await?;
        let response: BatchUpdateResponse = serde_json::from_value(response)?;
        response
            .replies
            .into_iter()
            .find_map(|reply| reply.add_sheet)
            .map(|reply| reply.properties.sheet_id)
            .ok_or_else(|| ConnectorError::Vendor {
                service: SERVICE,
                status: 200,
                message: "Response contains no addSheet reply".to_string(),
            })
    }

    /// Delete a sheet from the spreadsheet.
    pub async fn delete_sheet(&self, name: &str, ignore_missing: bool) -> Result<()> {
        tracing::info!("Deleting sheet \"{name}\"");
        match self.sheet_id(name).await? {
            Some(sheet_id) => {
                self.batch_update(vec![json!({"deleteSheet": {"sheetId": sheet_id}})])
                    .await?;
                Ok(())
            }
            None if ignore_missing => Ok(()),
            None => Err(ConnectorError::NotFound {
                message: format!("Sheet \"{name}\" not found"),
            }),
        }
    }

    /// Return the given sheet as a frame. The first row is the header.
    pub async fn get_sheet(&self, name: &str) -> Result<Frame> {
        tracing::info!("Loading sheet \"{name}\"");
        let token = self.auth.access_token(SCOPE).await?;
        let response = self
            .http
            .get(self.values_url(name)?)
            .query(&[("valueRenderOption", "UNFORMATTED_VALUE")])
            .bearer_auth(token)
            .send()
            .await?;
        let response = http::check_response(SERVICE, response).await?;
        let range: ValueRange = response.json().await?;
        Ok(Frame::from_values(range.values))
    }

    /// Upload a frame to a sheet.
    ///
    /// Creates the sheet when necessary; existing data and formatting are
    /// dropped. The header row is frozen and bolded, numeric columns are
    /// right-aligned and formatted with thousands separators.
    pub async fn set_sheet(&self, name: &str, data: &Frame) -> Result<()> {
        let mut updates: Vec<Value> = Vec::new();

        // Sheet formatting
        let mut grid = json!({
            "rowCount": data.num_rows() + 1,
            "columnCount": data.num_columns(),
        });
        if data.num_rows() > 0 {
            grid["frozenRowCount"] = json!(1);
        }
        let sheet_id = match self.sheet_id(name).await? {
            Some(sheet_id) => {
                updates.push(json!({
                    "updateSheetProperties": {
                        "fields": "gridProperties",
                        "properties": {"gridProperties": grid, "sheetId": sheet_id},
                    },
                }));
                updates.push(json!({
                    "updateCells": {
                        "fields": "userEnteredFormat",
                        "range": {"sheetId": sheet_id},
                    },
                }));
                sheet_id
            }
            None => self.add_sheet(name, Some(grid)).await?,
        };

        updates.push(format_request(
            json!({"textFormat": {"bold": true}, "wrapStrategy": "WRAP"}),
            sheet_id,
            Some((0, 1)),
            None,
        ));

        // 逐欄設定對齊與數字格式
        for (index, column_type) in data.column_types().into_iter().enumerate() {
            let columns = Some((index as i64, index as i64 + 1));
            let alignment = if column_type.is_numeric() { "RIGHT" } else { "LEFT" };
            updates.push(format_request(
                json!({"horizontalAlignment": alignment}),
                sheet_id,
                None,
                columns,
            ));
            match column_type {
                ColumnType::Integer => updates.push(format_request(
                    json!({"numberFormat": {"pattern": "#,##0", "type": "NUMBER"}}),
                    sheet_id,
                    None,
                    columns,
                )),
                ColumnType::Float => updates.push(format_request(
                    json!({"numberFormat": {"pattern": "#,##0.00", "type": "NUMBER"}}),
                    sheet_id,
                    None,
                    columns,
                )),
                _ => {}
            }
        }

        tracing::info!("Updating sheet \"{name}\"");
        self.batch_update(updates).await?;
        self.update_values(name, data).await?;

        // Resizing the columns last so the uploaded values are measured
        let dimensions = json!({"dimensions": {"dimension": "COLUMNS", "sheetId": sheet_id}});
        self.batch_update(vec![json!({"autoResizeDimensions": dimensions})])
            .await?;
        Ok(())
    }

    /// Return the sheet ID for a sheet name, when the sheet exists.
    pub async fn sheet_id(&self, name: &str) -> Result<Option<i64>> {
        let token = self.auth.access_token(SCOPE).await?;
        let response = self
            .http
            .get(format!("{}/spreadsheets/{}", self.endpoint, self.key))
            .query(&[("fields", "sheets.properties")])
            .bearer_auth(token)
            .send()
            .await?;
        let response = http::check_response(SERVICE, response).await?;
        let info: SpreadsheetInfo = response.json().await?;
        Ok(info
            .sheets
            .into_iter()
            .find(|sheet| sheet.properties.title == name)
            .map(|sheet| sheet.properties.sheet_id))
    }

    async fn batch_update(&self, requests: Vec<Value>) -> Result<Value> {
        tracing::debug!("Executing {} update requests", requests.len());
        let token = self.auth.access_token(SCOPE).await?;
        let response = self
            .http
            .post(format!(
                "{}/spreadsheets/{}:batchUpdate",
                self.endpoint, self.key
            ))
            .bearer_auth(token)
            .json(&json!({"requests": requests}))
            .send()
            .await?;
        let response = http::check_response(SERVICE, response).await?;
        Ok(response.json().await?)
    }

    async fn update_values(&self, name: &str, data: &Frame) -> Result<()> {
        tracing::debug!("Updating values");
        let token = self.auth.access_token(SCOPE).await?;
        let response = self
            .http
            .put(self.values_url(name)?)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&json!({"values": data.to_values()}))
            .send()
            .await?;
        http::check_response(SERVICE, response).await?;
        Ok(())
    }
}

fn format_request(
    user_entered_format: Value,
    sheet_id: i64,
    rows: Option<(i64, i64)>,
    columns: Option<(i64, i64)>,
) -> Value {
    let fields = user_entered_format
        .as_object()
        .map(|format| format.keys().cloned().collect::<Vec<_>>().join(","))
        .unwrap_or_default();
    let mut range = json!({"sheetId": sheet_id});
    if let Some((start, end)) = rows {
        range["startRowIndex"] = json!(start);
        range["endRowIndex"] = json!(end);
    }
    if let Some((start, end)) = columns {
        range["startColumnIndex"] = json!(start);
        range["endColumnIndex"] = json!(end);
    }
    json!({
        "repeatCell": {
            "range": range,
            "cell": {"userEnteredFormat": user_entered_format},
            "fields": format!("userEnteredFormat({fields})"),
        },
    })
}
