//! Source reader: loads a [`RawTable`] from a local CSV/JSON file or an HTTP(S) endpoint.
//!
//! - CSV: delimited rows, first row is the header. Short rows are padded with
//!   nulls, long rows truncated to the header width.
//! - JSON: an array of records (column set is the union of keys in first-seen
//!   order, absent keys become nulls) or a column-oriented object.
//! - HTTP(S): fetched through a [`Fetcher`] under a hard timeout, then parsed
//!   as JSON (or CSV when the URL path ends in `.csv`).
//!
//! Reading never writes to disk.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;
use tracing::{debug, error, info};

use crate::contract::Fetcher;
use crate::error::{FetchError, ReadError};
use crate::table::{RawTable, RawValue};

/// Body format of a remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Csv,
}

/// Where to read raw data from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Csv(PathBuf),
    Json(PathBuf),
    Http { url: String, format: BodyFormat },
}

impl Locator {
    pub fn parse(source: &str) -> Result<Self, ReadError> {
        let trimmed = source.trim();
        let lower = trimmed.to_ascii_lowercase();

        if lower.starts_with("http://") || lower.starts_with("https://") {
            let path_part = lower.split(['?', '#']).next().unwrap_or_default();
            let format = if path_part.ends_with(".csv") {
                BodyFormat::Csv
            } else {
                BodyFormat::Json
            };
            return Ok(Locator::Http {
                url: trimmed.to_string(),
                format,
            });
        }
        if lower.ends_with(".csv") {
            return Ok(Locator::Csv(PathBuf::from(trimmed)));
        }
        if lower.ends_with(".json") {
            return Ok(Locator::Json(PathBuf::from(trimmed)));
        }
        Err(ReadError::UnsupportedSource(source.to_string()))
    }
}

impl FromStr for Locator {
    type Err = ReadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Locator::parse(s)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Csv(path) | Locator::Json(path) => write!(f, "{}", path.display()),
            Locator::Http { url, .. } => f.write_str(url),
        }
    }
}

/// Reads raw tables, bounding every network fetch by `fetch_timeout`.
pub struct SourceReader<F> {
    fetcher: F,
    fetch_timeout: Duration,
}

impl<F: Fetcher> SourceReader<F> {
    pub fn new(fetcher: F, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            fetch_timeout,
        }
    }

    pub async fn read(&self, locator: &Locator) -> Result<RawTable, ReadError> {
        let table = match locator {
            Locator::Csv(path) => {
                let file = File::open(path).map_err(|source| {
                    error!(path = %path.display(), error = ?source, "[READ] Failed to open CSV source");
                    ReadError::Io {
                        path: path.clone(),
                        source,
                    }
                })?;
                read_csv(BufReader::new(file), &path.display().to_string())?
            }
            Locator::Json(path) => {
                let text = fs::read_to_string(path).map_err(|source| {
                    error!(path = %path.display(), error = ?source, "[READ] Failed to open JSON source");
                    ReadError::Io {
                        path: path.clone(),
                        source,
                    }
                })?;
                read_json(&text, &path.display().to_string())?
            }
            Locator::Http { url, format } => {
                info!(url = %url, timeout = ?self.fetch_timeout, "[READ] Fetching remote source");
                let body = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url))
                    .await
                {
                    Ok(Ok(body)) => body,
                    Ok(Err(e)) => {
                        error!(url = %url, error = %e, "[READ] Remote fetch failed");
                        return Err(e.into());
                    }
                    Err(_) => {
                        error!(url = %url, timeout = ?self.fetch_timeout, "[READ] Remote fetch timed out");
                        return Err(FetchError::Timeout {
                            url: url.clone(),
                            timeout: self.fetch_timeout,
                        }
                        .into());
                    }
                };
                match format {
                    BodyFormat::Json => read_json(&body, url)?,
                    BodyFormat::Csv => read_csv(body.as_bytes(), url)?,
                }
            }
        };

        info!(
            source = %locator,
            rows = table.row_count(),
            columns = table.column_count(),
            "[READ] Loaded raw table"
        );
        Ok(table)
    }
}

/// Parses delimited text with a header row. `origin` names the source in errors.
pub fn read_csv<R: Read>(input: R, origin: &str) -> Result<RawTable, ReadError> {
    let csv_error = |source| ReadError::Csv {
        origin: origin.to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(input);
    let columns: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    let width = columns.len();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        if record.len() != width {
            debug!(origin, line = ?record.position().map(|p| p.line()), fields = record.len(), width, "Ragged CSV row");
        }
        let mut row: Vec<RawValue> = record
            .iter()
            .take(width)
            .map(|field| {
                if field.is_empty() {
                    RawValue::Null
                } else {
                    RawValue::Text(field.to_string())
                }
            })
            .collect();
        row.resize(width, RawValue::Null);
        rows.push(row);
    }

    Ok(RawTable { columns, rows })
}

/// Parses a JSON document: an array of records, or an object of columns.
pub fn read_json(text: &str, origin: &str) -> Result<RawTable, ReadError> {
    let json_error = |reason: String| ReadError::Json {
        origin: origin.to_string(),
        reason,
    };

    let document: Json = serde_json::from_str(text).map_err(|e| json_error(e.to_string()))?;
    match document {
        Json::Array(records) => records_to_table(records).map_err(json_error),
        Json::Object(columns) => columns_to_table(columns).map_err(json_error),
        other => Err(json_error(format!(
            "expected an array of records or an object of columns, found {}",
            json_type(&other)
        ))),
    }
}

fn records_to_table(records: Vec<Json>) -> Result<RawTable, String> {
    let mut columns: Vec<String> = Vec::new();
    let mut objects = Vec::with_capacity(records.len());

    for (position, record) in records.into_iter().enumerate() {
        let object = match record {
            Json::Object(object) => object,
            other => {
                return Err(format!(
                    "record {position} is {}, expected an object",
                    json_type(&other)
                ))
            }
        };
        for key in object.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
        objects.push(object);
    }

    let rows = objects
        .into_iter()
        .map(|mut object| {
            columns
                .iter()
                .map(|name| object.remove(name).map_or(RawValue::Null, raw_from_json))
                .collect()
        })
        .collect();

    Ok(RawTable { columns, rows })
}

fn columns_to_table(object: serde_json::Map<String, Json>) -> Result<RawTable, String> {
    let mut columns = Vec::with_capacity(object.len());
    let mut row_keys: Vec<String> = Vec::new();
    let mut cells: Vec<HashMap<String, Json>> = Vec::with_capacity(object.len());

    for (name, column) in object {
        let entries: Vec<(String, Json)> = match column {
            Json::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            Json::Object(by_index) => by_index.into_iter().collect(),
            other => {
                return Err(format!(
                    "column {name:?} is {}, expected an array or an object",
                    json_type(&other)
                ))
            }
        };
        for (key, _) in &entries {
            if !row_keys.contains(key) {
                row_keys.push(key.clone());
            }
        }
        columns.push(name);
        cells.push(entries.into_iter().collect());
    }

    let rows = row_keys
        .iter()
        .map(|key| {
            cells
                .iter_mut()
                .map(|column| column.remove(key).map_or(RawValue::Null, raw_from_json))
                .collect()
        })
        .collect();

    Ok(RawTable { columns, rows })
}

fn raw_from_json(value: Json) -> RawValue {
    match value {
        Json::Null => RawValue::Null,
        Json::Bool(b) => RawValue::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => RawValue::Int(i),
            None => n.as_f64().map_or(RawValue::Null, RawValue::Float),
        },
        Json::String(s) => RawValue::Text(s),
        nested => RawValue::Text(nested.to_string()),
    }
}

fn json_type(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

/// reqwest-backed [`Fetcher`].
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                error!(error = ?e, "[READ] Failed to build HTTP client");
                FetchError::Client {
                    reason: e.to_string(),
                }
            })?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout: self.timeout,
                }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(classify)
    }
}
