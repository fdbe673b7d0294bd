//! Spreadsheet upload: push local CSV tables to Google Sheets.

use crate::csv;
use serde::Deserialize;
use std::time::Duration;

/// Result of writing a CSV table into a sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    #[serde(default)]
    pub spreadsheet_id: String,
    #[serde(default)]
    pub updated_range: String,
    #[serde(default)]
    pub updated_rows: u64,
    #[serde(default)]
    pub updated_cells: u64,
}

/// Destination for CSV tables.
#[allow(async_fn_in_trait)]
pub trait SpreadsheetSink {
    /// Create a new spreadsheet in the `parent` folder, returning its id.
    async fn create_spreadsheet(&self, parent: &str, name: &str) -> Result<String, SinkError>;

    /// Add a tab named `sheet_name` to an existing spreadsheet.
    async fn create_sheet(&self, spreadsheet_id: &str, sheet_name: &str) -> Result<(), SinkError>;

    /// Replace the contents of a tab with the given CSV.
    async fn upload_csv(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        csv_bytes: &[u8],
    ) -> Result<UploadResponse, SinkError>;

    /// Read a tab back as CSV.
    async fn fetch_csv(&self, spreadsheet_id: &str, sheet_name: &str) -> Result<Vec<u8>, SinkError>;
}

/// Endpoints and credentials for the Google APIs.
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub sheets_base: String,
    pub drive_base: String,
    pub access_token: String,
}

/// Google Sheets/Drive REST client.
pub struct GoogleSheets {
    client: reqwest::Client,
    endpoints: GoogleEndpoints,
}

const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

impl GoogleSheets {
    pub fn new(endpoints: GoogleEndpoints) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(SinkError::Http)?;
        Ok(Self { client, endpoints })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SinkError> {
        let resp = request
            .bearer_auth(&self.endpoints.access_token)
            .send()
            .await
            .map_err(SinkError::Http)?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Status { status, body });
        }
        Ok(resp)
    }
}

impl SpreadsheetSink for GoogleSheets {
    async fn create_spreadsheet(&self, parent: &str, name: &str) -> Result<String, SinkError> {
        #[derive(Deserialize)]
        struct Created {
            id: String,
        }
        let url = endpoint(&self.endpoints.drive_base, &["files"])?;
        let body = serde_json::json!({
            "name": name,
            "mimeType": SPREADSHEET_MIME,
            "parents": [parent],
        });
        tracing::info!(name, parent, "creating spreadsheet");
        let resp = self.send(self.client.post(url).json(&body)).await?;
        let created: Created = resp.json().await.map_err(SinkError::Http)?;
        Ok(created.id)
    }

    async fn create_sheet(&self, spreadsheet_id: &str, sheet_name: &str) -> Result<(), SinkError> {
        let url = endpoint(
            &self.endpoints.sheets_base,
            &["spreadsheets", &format!("{spreadsheet_id}:batchUpdate")],
        )?;
        tracing::info!(spreadsheet_id, sheet_name, "creating sheet");
        self.send(self.client.post(url).json(&add_sheet_body(sheet_name)))
            .await?;
        Ok(())
    }

    async fn upload_csv(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        csv_bytes: &[u8],
    ) -> Result<UploadResponse, SinkError> {
        let range = sheet_range(sheet_name);
        let mut url = endpoint(
            &self.endpoints.sheets_base,
            &["spreadsheets", spreadsheet_id, "values", &range],
        )?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        let body = values_body(&range, csv_bytes)?;
        tracing::info!(spreadsheet_id, sheet_name, "uploading csv");
        let resp = self.send(self.client.put(url).json(&body)).await?;
        resp.json().await.map_err(SinkError::Http)
    }

    async fn fetch_csv(&self, spreadsheet_id: &str, sheet_name: &str) -> Result<Vec<u8>, SinkError> {
        #[derive(Deserialize)]
        struct ValueRange {
            #[serde(default)]
            values: Vec<Vec<String>>,
        }
        let range = sheet_range(sheet_name);
        let url = endpoint(
            &self.endpoints.sheets_base,
            &["spreadsheets", spreadsheet_id, "values", &range],
        )?;
        let resp = self.send(self.client.get(url)).await?;
        let values: ValueRange = resp.json().await.map_err(SinkError::Http)?;
        Ok(values
            .values
            .iter()
            .map(|row| csv::format_record(row))
            .collect::<String>()
            .into_bytes())
    }
}

/// Join percent-encoded path segments onto a base URL.
fn endpoint(base: &str, segments: &[&str]) -> Result<reqwest::Url, SinkError> {
    let bad_base = |detail: String| SinkError::Url {
        url: base.to_string(),
        detail,
    };
    let mut url = reqwest::Url::parse(base).map_err(|e| bad_base(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| bad_base("cannot be a base URL".to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// A1 range covering a whole tab.
fn sheet_range(sheet_name: &str) -> String {
    format!("'{}'", sheet_name.replace('\'', "''"))
}

fn add_sheet_body(sheet_name: &str) -> serde_json::Value {
    serde_json::json!({
        "requests": [{ "addSheet": { "properties": { "title": sheet_name } } }]
    })
}

fn values_body(range: &str, csv_bytes: &[u8]) -> Result<serde_json::Value, SinkError> {
    let text = String::from_utf8_lossy(csv_bytes);
    let values = csv::parse(&text).map_err(SinkError::Csv)?;
    Ok(serde_json::json!({
        "range": range,
        "majorDimension": "ROWS",
        "values": values,
    }))
}

/// Errors from spreadsheet operations. All of them abort the run.
#[derive(Debug)]
pub enum SinkError {
    /// Transport or response decoding failure.
    Http(reqwest::Error),
    /// The API answered with a non-success status.
    Status { status: u16, body: String },
    /// A configured endpoint is not a usable URL.
    Url { url: String, detail: String },
    /// The table to upload is not valid CSV.
    Csv(csv::ParseError),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Http(e) => write!(f, "spreadsheet request failed: {e}"),
            SinkError::Status { status, body } => {
                write!(
                    f,
                    "spreadsheet API returned {status}: {}",
                    body.lines().take(10).collect::<Vec<_>>().join("\n")
                )
            }
            SinkError::Url { url, detail } => write!(f, "invalid endpoint '{url}': {detail}"),
            SinkError::Csv(e) => write!(f, "cannot upload table: {e}"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Http(e) => Some(e),
            SinkError::Csv(e) => Some(e),
            SinkError::Status { .. } | SinkError::Url { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_range_segment() {
        let url = endpoint(
            "https://sheets.googleapis.com/v4/",
            &["spreadsheets", "abc", "values", &sheet_range("nodeCPU-run 1")],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/'nodeCPU-run%201'"
        );
    }

    #[test]
    fn endpoint_keeps_batch_update_suffix() {
        let url = endpoint(
            "https://sheets.googleapis.com/v4",
            &["spreadsheets", "abc:batchUpdate"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc:batchUpdate"
        );
    }

    #[test]
    fn endpoint_rejects_garbage_base() {
        assert!(matches!(
            endpoint("not a url", &["files"]),
            Err(SinkError::Url { .. })
        ));
    }

    #[test]
    fn sheet_range_escapes_quotes() {
        assert_eq!(sheet_range("Sheet1"), "'Sheet1'");
        assert_eq!(sheet_range("it's"), "'it''s'");
    }

    #[test]
    fn values_body_parses_csv_rows() {
        let body = values_body("'Sheet1'", b"Iteration,UUID\niteration_1,\"a,b\"\n").unwrap();
        assert_eq!(body["range"], "'Sheet1'");
        assert_eq!(body["values"][0][0], "Iteration");
        assert_eq!(body["values"][1][1], "a,b");
    }

    #[test]
    fn add_sheet_body_names_tab() {
        let body = add_sheet_body("kubeletCPU-run-1");
        assert_eq!(
            body["requests"][0]["addSheet"]["properties"]["title"],
            "kubeletCPU-run-1"
        );
    }

    #[test]
    fn upload_response_decodes_camel_case() {
        let r: UploadResponse = serde_json::from_str(
            r#"{"spreadsheetId":"s","updatedRange":"Sheet1!A1:W3","updatedRows":3,"updatedCells":69}"#,
        )
        .unwrap();
        assert_eq!(r.updated_rows, 3);
        assert_eq!(r.spreadsheet_id, "s");
    }
}
