//! Transformer: turns a [`RawTable`] into a [`CanonicalTable`].
//!
//! Rules, applied in order:
//!
//! 1. Column names are trimmed, lower-cased and have whitespace runs replaced
//!    by `_`. Blank names become `column_<n>`; collisions get `_2`, `_3`, ...
//! 2. Text cells are trimmed; empty text and nulls become [`Value::Missing`].
//! 3. Each column gets the first matching type: numeric (every non-missing cell
//!    parses as a number, `1,234` style thousands separators allowed), timestamp
//!    (every non-missing cell parses as a known date/time format), otherwise text.
//! 4. Rows identical across all columns collapse to their first occurrence.
//!    Text is compared case-insensitively.
//! 5. Text columns whose distinct-value count is below
//!    `categorical_ratio * rows` become categorical.
//!
//! The output depends on nothing but the input and the config, and
//! transforming an already-canonical table changes nothing.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::TransformError;
use crate::table::{CanonicalTable, Column, ColumnKind, RawTable, RawValue, Value};

/// Distinct non-missing values must stay below this share of rows for a text
/// column to count as categorical.
pub const DEFAULT_CATEGORICAL_RATIO: f64 = 0.05;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static THOUSANDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d{1,3}(,\d{3})+(\.\d+)?$").expect("static regex"));

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "default_ratio")]
    pub categorical_ratio: f64,
}

fn default_ratio() -> f64 {
    DEFAULT_CATEGORICAL_RATIO
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            categorical_ratio: DEFAULT_CATEGORICAL_RATIO,
        }
    }
}

pub fn transform(raw: &RawTable, config: &TransformConfig) -> Result<CanonicalTable, TransformError> {
    if raw.row_count() == 0 || raw.column_count() == 0 {
        error!(
            rows = raw.row_count(),
            columns = raw.column_count(),
            "[TRANSFORM] Refusing to transform an empty table"
        );
        return Err(TransformError::EmptyTable {
            rows: raw.row_count(),
            columns: raw.column_count(),
        });
    }

    let names = normalize_column_names(&raw.columns);
    let typed: Vec<Column> = names
        .into_iter()
        .enumerate()
        .map(|(index, name)| coerce_column(raw, index, name))
        .collect();

    let table = CanonicalTable::from_columns(typed);
    let keep = first_occurrences(&table);
    let mut table = if keep.len() < table.row_count() {
        table.select_rows(&keep)
    } else {
        table
    };

    classify_text_columns(&mut table, config.categorical_ratio);

    info!(
        rows_in = raw.row_count(),
        rows_out = table.row_count(),
        columns = table.column_count(),
        "[TRANSFORM] Canonical table ready"
    );
    Ok(table)
}

/// Trim, lower-case and join whitespace runs with `_`.
pub fn normalize_column_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    WHITESPACE.replace_all(&lowered, "_").into_owned()
}

fn normalize_column_names(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .enumerate()
        .map(|(position, original)| {
            let mut base = normalize_column_name(original);
            if base.is_empty() {
                base = format!("column_{}", position + 1);
            }
            let mut name = base.clone();
            let mut suffix = 2;
            while !seen.insert(name.clone()) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
            if name != *original {
                debug!(original = %original, normalized = %name, "[TRANSFORM] Renamed column");
            }
            name
        })
        .collect()
}

/// Trimmed cell, `None` when null or blank.
fn clean_cell(raw: &RawTable, row: usize, column: usize) -> Option<RawValue> {
    match raw.rows[row].get(column)? {
        RawValue::Null => None,
        RawValue::Text(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| RawValue::Text(trimmed.to_string()))
        }
        other => Some(other.clone()),
    }
}

fn coerce_column(raw: &RawTable, index: usize, name: String) -> Column {
    let cells: Vec<Option<RawValue>> = (0..raw.row_count())
        .map(|row| clean_cell(raw, row, index))
        .collect();

    let numbers: Option<Vec<Value>> = cells
        .iter()
        .map(|cell| match cell {
            None => Some(Value::Missing),
            Some(v) => parse_number(v).map(Value::Number),
        })
        .collect();
    if let Some(values) = numbers {
        debug!(column = %name, kind = "numeric", "[TRANSFORM] Inferred column type");
        return Column {
            name,
            kind: ColumnKind::Numeric,
            values,
        };
    }

    let timestamps: Option<Vec<Value>> = cells
        .iter()
        .map(|cell| match cell {
            None => Some(Value::Missing),
            Some(RawValue::Text(s)) => parse_timestamp(s).map(Value::Timestamp),
            Some(_) => None,
        })
        .collect();
    if let Some(values) = timestamps {
        debug!(column = %name, kind = "timestamp", "[TRANSFORM] Inferred column type");
        return Column {
            name,
            kind: ColumnKind::Timestamp,
            values,
        };
    }

    let values = cells
        .into_iter()
        .map(|cell| {
            cell.and_then(|v| v.as_text())
                .map_or(Value::Missing, Value::Text)
        })
        .collect();
    Column {
        name,
        kind: ColumnKind::Text,
        values,
    }
}

/// Numeric reading of a cell; non-finite values do not count.
pub fn parse_number(value: &RawValue) -> Option<f64> {
    let parsed = match value {
        RawValue::Int(i) => *i as f64,
        RawValue::Float(f) => *f,
        RawValue::Text(s) => {
            let s = s.trim();
            if THOUSANDS.is_match(s) {
                s.replace(',', "").parse().ok()?
            } else {
                s.parse().ok()?
            }
        }
        RawValue::Null | RawValue::Bool(_) => return None,
    };
    parsed.is_finite().then_some(parsed)
}

/// Timestamp reading of a text cell. RFC 3339 offsets are normalized to UTC.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(text) {
        return Some(with_offset.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATE_FORMATS.iter().find_map(|format| {
                NaiveDate::parse_from_str(text, format)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
        })
}

/// Indices of the first occurrence of every distinct row.
fn first_occurrences(table: &CanonicalTable) -> Vec<usize> {
    let mut seen = HashSet::with_capacity(table.row_count());
    let mut keep = Vec::with_capacity(table.row_count());
    for index in 0..table.row_count() {
        let key: Vec<Option<String>> = table
            .columns()
            .iter()
            .map(|column| match &column.values[index] {
                Value::Missing => None,
                Value::Text(s) => Some(s.to_lowercase()),
                other => Some(other.render()),
            })
            .collect();
        if seen.insert(key) {
            keep.push(index);
        }
    }
    let dropped = table.row_count() - keep.len();
    if dropped > 0 {
        info!(dropped, "[TRANSFORM] Removed duplicate rows");
    }
    keep
}

fn classify_text_columns(table: &mut CanonicalTable, ratio: f64) {
    let rows = table.row_count() as f64;
    for column in table.columns_mut() {
        if !column.kind.is_textual() {
            continue;
        }
        let levels: BTreeSet<String> = column
            .values
            .iter()
            .filter_map(|v| match v {
                Value::Text(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        column.kind = if (levels.len() as f64) < ratio * rows {
            debug!(column = %column.name, levels = levels.len(), "[TRANSFORM] Marked column categorical");
            ColumnKind::Categorical { levels }
        } else {
            ColumnKind::Text
        };
    }
}
