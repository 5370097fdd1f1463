//! Table data model shared by every stage.
//!
//! [`RawTable`] is what a reader produces: ordered column names and rows of
//! loosely typed cells, verbatim from the source. [`CanonicalTable`] is what the
//! transformer produces: one [`ColumnKind`] per column and typed [`Value`] cells.

use std::collections::BTreeSet;

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;

/// A single cell as read from a source.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    /// Textual form used when a cell lands in a text column.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Null => None,
            RawValue::Bool(b) => Some(b.to_string()),
            RawValue::Int(i) => Some(i.to_string()),
            RawValue::Float(f) => Some(render_number(*f)),
            RawValue::Text(s) => Some(s.clone()),
        }
    }
}

/// Untyped table as read verbatim from a source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub columns: Vec<String>,
    /// Each row holds exactly `columns.len()` cells.
    pub rows: Vec<Vec<RawValue>>,
}

impl RawTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Semantic type of a canonical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Timestamp,
    /// Low-cardinality text; `levels` is the ordered distinct-value set.
    Categorical { levels: BTreeSet<String> },
    Text,
}

impl ColumnKind {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Timestamp => "timestamp",
            ColumnKind::Categorical { .. } => "categorical",
            ColumnKind::Text => "text",
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnKind::Categorical { .. } | ColumnKind::Text)
    }
}

/// A typed cell of a canonical table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null or empty placeholder. Numeric aggregation skips it.
    Missing,
    Number(f64),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Serialized form written to the output file.
    pub fn render(&self) -> String {
        match self {
            Value::Missing => String::new(),
            Value::Number(x) => render_number(*x),
            Value::Timestamp(ts) => render_timestamp(ts),
            Value::Text(s) => s.clone(),
        }
    }
}

pub(crate) fn render_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

fn render_timestamp(ts: &NaiveDateTime) -> String {
    let at_midnight =
        ts.hour() == 0 && ts.minute() == 0 && ts.second() == 0 && ts.nanosecond() == 0;
    if at_midnight {
        ts.format("%Y-%m-%d").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub values: Vec<Value>,
}

impl Column {
    /// Non-missing numeric values, in row order.
    pub fn numbers(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().filter_map(|v| match v {
            Value::Number(x) => Some(*x),
            _ => None,
        })
    }

    pub fn non_missing(&self) -> usize {
        self.values.iter().filter(|v| !v.is_missing()).count()
    }

    pub fn distinct_count(&self) -> usize {
        self.values
            .iter()
            .filter(|v| !v.is_missing())
            .map(Value::render)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Sum of non-missing values; `None` for non-numeric or all-missing columns.
    pub fn sum(&self) -> Option<f64> {
        if self.kind != ColumnKind::Numeric {
            return None;
        }
        let mut seen = false;
        let total = self.numbers().fold(0.0, |acc, x| {
            seen = true;
            acc + x
        });
        seen.then_some(total)
    }

    pub fn mean(&self) -> Option<f64> {
        let count = self.numbers().count();
        self.sum().map(|total| total / count as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.numbers().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.numbers().reduce(f64::max)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        self.values.iter().filter_map(|v| match v {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        })
    }
}

/// Normalized, typed, deduplicated table. All columns have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTable {
    columns: Vec<Column>,
    rows: usize,
}

impl CanonicalTable {
    /// Builds a table from equal-length columns.
    pub(crate) fn from_columns(columns: Vec<Column>) -> Self {
        let rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        debug_assert!(columns.iter().all(|c| c.values.len() == rows));
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Cells of row `index` in column order.
    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        (index < self.rows).then(|| self.columns.iter().map(|c| &c.values[index]).collect())
    }

    /// A table with the same columns and only the rows whose index is in `keep`.
    pub(crate) fn select_rows(&self, keep: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                kind: c.kind.clone(),
                values: keep.iter().map(|&i| c.values[i].clone()).collect(),
            })
            .collect();
        Self::from_columns(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(Value::Number(1234.0).render(), "1234");
        assert_eq!(Value::Number(-0.0).render(), "0");
        assert_eq!(Value::Number(12.5).render(), "12.5");
        assert_eq!(Value::Missing.render(), "");
    }

    #[test]
    fn midnight_timestamps_render_as_dates() {
        let day = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        let midnight = day.and_hms_opt(0, 0, 0).unwrap();
        let afternoon = day.and_hms_opt(14, 5, 9).unwrap();
        assert_eq!(Value::Timestamp(midnight).render(), "2020-03-01");
        assert_eq!(Value::Timestamp(afternoon).render(), "2020-03-01 14:05:09");
    }

    #[test]
    fn aggregation_skips_missing_values() {
        let column = Column {
            name: "cases".into(),
            kind: ColumnKind::Numeric,
            values: vec![Value::Number(2.0), Value::Missing, Value::Number(4.0)],
        };
        assert_eq!(column.sum(), Some(6.0));
        assert_eq!(column.mean(), Some(3.0));
        assert_eq!(column.min(), Some(2.0));
        assert_eq!(column.max(), Some(4.0));

        let empty = Column {
            name: "deaths".into(),
            kind: ColumnKind::Numeric,
            values: vec![Value::Missing, Value::Missing],
        };
        assert_eq!(empty.sum(), None);
        assert_eq!(empty.mean(), None);
    }
}
