use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value};

use crate::domain::ObjectId;
use crate::error::HarvestError;

pub const DEFAULT_SERVICE_URL: &str = "https://crc1625.mdi.ruhr-uni-bochum.de";
const API_PREFIX: &str = "vroapi/v1";
const API_KEY_HEADER: &str = "vroapi";

/// One result row, column name to scalar.
pub type Row = Map<String, Value>;

pub trait RemoteExecutor: Send + Sync {
    /// Runs one SQL statement. An empty result is `Ok(vec![])`, never an error.
    fn execute(&self, sql: &str) -> Result<Vec<Row>, HarvestError>;
}

#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub bytes: Vec<u8>,
    pub suggested_filename: Option<String>,
}

pub trait FileFetcher: Send + Sync {
    fn fetch(&self, id: ObjectId) -> Result<FetchedFile, HarvestError>;
}

impl<T: RemoteExecutor + ?Sized> RemoteExecutor for &T {
    fn execute(&self, sql: &str) -> Result<Vec<Row>, HarvestError> {
        (**self).execute(sql)
    }
}

impl<T: FileFetcher + ?Sized> FileFetcher for &T {
    fn fetch(&self, id: ObjectId) -> Result<FetchedFile, HarvestError> {
        (**self).fetch(id)
    }
}

#[derive(Clone)]
pub struct VroHttpClient {
    client: Client,
    api_url: String,
}

impl VroHttpClient {
    pub fn new(service_url: &str, api_key: &str, timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("matinf-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::RemoteHttp(err.to_string()))?,
        );
        let mut key = HeaderValue::from_str(api_key.trim())
            .map_err(|_| HarvestError::RemoteHttp("API key is not a valid header value".to_string()))?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::RemoteHttp(err.to_string()))?;
        Ok(Self {
            client,
            api_url: format!("{}/{API_PREFIX}", service_url.trim_end_matches('/')),
        })
    }

    fn execute_url(&self) -> String {
        format!("{}/execute", self.api_url)
    }

    fn download_url(&self) -> String {
        format!("{}/download", self.api_url)
    }
}

impl RemoteExecutor for VroHttpClient {
    fn execute(&self, sql: &str) -> Result<Vec<Row>, HarvestError> {
        let response = self
            .client
            .post(self.execute_url())
            .form(&[("sql", sql)])
            .send()
            .map_err(|err| HarvestError::RemoteHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "MatInf query failed".to_string());
            return Err(HarvestError::RemoteStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| HarvestError::MalformedResponse(err.to_string()))?;
        rows_from_json(body)
    }
}

impl FileFetcher for VroHttpClient {
    fn fetch(&self, id: ObjectId) -> Result<FetchedFile, HarvestError> {
        let response = self
            .client
            .get(self.download_url())
            .query(&[("id", id.get())])
            .send()
            .map_err(|err| HarvestError::DownloadHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "MatInf download failed".to_string());
            return Err(HarvestError::DownloadStatus { status, message });
        }
        let suggested_filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(filename_from_content_disposition);
        let bytes = response
            .bytes()
            .map_err(|err| HarvestError::DownloadHttp(err.to_string()))?;
        Ok(FetchedFile {
            bytes: bytes.to_vec(),
            suggested_filename,
        })
    }
}

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("static filename pattern")
});

pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    FILENAME_RE
        .captures(header)
        .and_then(|caps| caps.get(1))
        .map(|value| value.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Accepts `null`, an array of row objects, or a column-oriented object
/// (`{"col": [v0, v1, ..]}`).
pub fn rows_from_json(body: Value) -> Result<Vec<Row>, HarvestError> {
    match body {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(HarvestError::MalformedResponse(format!(
                    "expected row object, got {other}"
                ))),
            })
            .collect(),
        Value::Object(columns) => {
            let mut rows: Vec<Row> = Vec::new();
            let mut expected = None;
            for (column, values) in columns {
                let Value::Array(values) = values else {
                    return Err(HarvestError::MalformedResponse(format!(
                        "column {column} is not an array"
                    )));
                };
                if expected.is_none() {
                    expected = Some(values.len());
                    rows.resize_with(values.len(), Row::new);
                } else if rows.len() != values.len() {
                    return Err(HarvestError::MalformedResponse(format!(
                        "column {column} has {} values, expected {}",
                        values.len(),
                        rows.len()
                    )));
                }
                for (row, value) in rows.iter_mut().zip(values) {
                    row.insert(column.clone(), value);
                }
            }
            Ok(rows)
        }
        other => Err(HarvestError::MalformedResponse(format!(
            "unexpected response body: {other}"
        ))),
    }
}

pub fn column_id(row: &Row, column: &str) -> Result<ObjectId, HarvestError> {
    match row.get(column) {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.fract() == 0.0).map(|v| v as i64))
            .map(ObjectId::new)
            .ok_or_else(|| malformed(column, "not an integer id")),
        Some(Value::String(text)) => text.parse().map_err(|_| malformed(column, "not an integer id")),
        Some(_) => Err(malformed(column, "not an integer id")),
        None => Err(malformed(column, "missing")),
    }
}

pub fn column_f64(row: &Row, column: &str) -> Result<f64, HarvestError> {
    match row.get(column) {
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or_else(|| malformed(column, "not a number")),
        Some(Value::String(text)) => text
            .trim()
            .parse()
            .map_err(|_| malformed(column, "not a number")),
        Some(_) => Err(malformed(column, "not a number")),
        None => Err(malformed(column, "missing")),
    }
}

/// Text value of a column; `null` and blank strings are `None`. Numbers and
/// booleans are rendered as text.
pub fn column_text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn require_column(row: &Row, column: &str) -> Result<(), HarvestError> {
    if row.contains_key(column) {
        Ok(())
    } else {
        Err(malformed(column, "missing"))
    }
}

pub fn require_text(row: &Row, column: &str) -> Result<String, HarvestError> {
    require_column(row, column)?;
    column_text(row, column).ok_or_else(|| malformed(column, "empty"))
}

fn malformed(column: &str, reason: &str) -> HarvestError {
    HarvestError::MalformedResponse(format!("column {column}: {reason}"))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn content_disposition_filename() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"edx 12.csv\"; size=10"),
            Some("edx 12.csv".to_string())
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=map.png"),
            Some("map.png".to_string())
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
    }

    #[test]
    fn null_body_is_empty() {
        assert!(rows_from_json(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn record_and_column_shapes_agree() {
        let records = rows_from_json(json!([
            {"sampleid": 1, "elements": "-Pt-"},
            {"sampleid": 2, "elements": "-Pd-"}
        ]))
        .unwrap();
        let columns = rows_from_json(json!({
            "sampleid": [1, 2],
            "elements": ["-Pt-", "-Pd-"]
        }))
        .unwrap();
        assert_eq!(records, columns);
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let err = rows_from_json(json!({"a": [1, 2], "b": [1]})).unwrap_err();
        assert_matches!(err, HarvestError::MalformedResponse(_));
    }

    #[test]
    fn column_helpers_accept_numeric_strings() {
        let row = rows_from_json(json!([{"id": "42", "pct": "12.5", "blank": " "}]))
            .unwrap()
            .remove(0);
        assert_eq!(column_id(&row, "id").unwrap(), ObjectId::new(42));
        assert_eq!(column_f64(&row, "pct").unwrap(), 12.5);
        assert_eq!(column_text(&row, "blank"), None);
        assert_matches!(
            column_id(&row, "missing"),
            Err(HarvestError::MalformedResponse(_))
        );
    }
}
