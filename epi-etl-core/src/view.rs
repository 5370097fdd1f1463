//! Read-only views over a canonical table: row filters, column totals and CSV export.

use chrono::NaiveDateTime;
use tracing::debug;

use crate::contract::TableSink;
use crate::error::{ViewError, WriteError};
use crate::table::{CanonicalTable, Column, ColumnKind, Value};
use crate::transform::{normalize_column_name, parse_timestamp};
use crate::write::CsvSink;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Text or categorical column equals one of `values`.
    OneOf { column: String, values: Vec<String> },
    /// Numeric column within `min..=max`.
    Range { column: String, min: f64, max: f64 },
    /// Timestamp column within `start..=end`.
    Between {
        column: String,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::OneOf { column, .. }
            | Filter::Range { column, .. }
            | Filter::Between { column, .. } => column,
        }
    }

    /// Parses `column=v1|v2|...`.
    pub fn parse_one_of(expr: &str) -> Result<Self, ViewError> {
        let (column, values) = split_expr(expr)?;
        Ok(Filter::OneOf {
            column,
            values: values.split('|').map(|v| v.trim().to_string()).collect(),
        })
    }

    /// Parses `column=min..max` against `table`: a numeric column gives a
    /// [`Filter::Range`], a timestamp column a [`Filter::Between`].
    pub fn parse_range(expr: &str, table: &CanonicalTable) -> Result<Self, ViewError> {
        let (column, bounds) = split_expr(expr)?;
        let (low, high) = bounds
            .split_once("..")
            .ok_or_else(|| ViewError::InvalidExpression(expr.to_string()))?;
        let invalid = || ViewError::InvalidExpression(expr.to_string());

        match &lookup(table, &column)?.kind {
            ColumnKind::Numeric => Ok(Filter::Range {
                min: low.trim().parse().map_err(|_| invalid())?,
                max: high.trim().parse().map_err(|_| invalid())?,
                column,
            }),
            ColumnKind::Timestamp => Ok(Filter::Between {
                start: parse_timestamp(low).ok_or_else(invalid)?,
                end: parse_timestamp(high).ok_or_else(invalid)?,
                column,
            }),
            _ => Err(ViewError::KindMismatch {
                column,
                expected: "numeric or timestamp",
            }),
        }
    }

    fn check(&self, table: &CanonicalTable) -> Result<(), ViewError> {
        let column = lookup(table, self.column())?;
        let (ok, expected) = match self {
            Filter::OneOf { .. } => (column.kind.is_textual(), "text or categorical"),
            Filter::Range { .. } => (column.kind == ColumnKind::Numeric, "numeric"),
            Filter::Between { .. } => (column.kind == ColumnKind::Timestamp, "timestamp"),
        };
        if ok {
            Ok(())
        } else {
            Err(ViewError::KindMismatch {
                column: column.name.clone(),
                expected,
            })
        }
    }

    fn keeps(&self, value: &Value) -> bool {
        match (self, value) {
            (Filter::OneOf { values, .. }, Value::Text(s)) => values.iter().any(|v| v == s),
            (Filter::Range { min, max, .. }, Value::Number(x)) => *min <= *x && *x <= *max,
            (Filter::Between { start, end, .. }, Value::Timestamp(ts)) => start <= ts && ts <= end,
            _ => false,
        }
    }
}

fn split_expr(expr: &str) -> Result<(String, String), ViewError> {
    match expr.split_once('=') {
        Some((column, rest)) if !column.trim().is_empty() => {
            Ok((normalize_column_name(column), rest.to_string()))
        }
        _ => Err(ViewError::InvalidExpression(expr.to_string())),
    }
}

fn lookup<'t>(table: &'t CanonicalTable, name: &str) -> Result<&'t Column, ViewError> {
    table
        .column(name)
        .ok_or_else(|| ViewError::UnknownColumn(name.to_string()))
}

/// Rows passing every filter, in their original order. A row whose value in a
/// filtered column is missing never passes.
pub fn apply(table: &CanonicalTable, filters: &[Filter]) -> Result<CanonicalTable, ViewError> {
    let mut targets = Vec::with_capacity(filters.len());
    for filter in filters {
        filter.check(table)?;
        targets.push((filter, lookup(table, filter.column())?));
    }

    let keep: Vec<usize> = (0..table.row_count())
        .filter(|&row| {
            targets
                .iter()
                .all(|(filter, column)| filter.keeps(&column.values[row]))
        })
        .collect();
    debug!(
        filters = filters.len(),
        rows_in = table.row_count(),
        rows_out = keep.len(),
        "[VIEW] Applied filters"
    );
    Ok(table.select_rows(&keep))
}

/// Sum of every numeric column, missing values skipped. An all-missing column totals 0.
pub fn totals(table: &CanonicalTable) -> Vec<(String, f64)> {
    table
        .columns()
        .iter()
        .filter(|c| c.kind == ColumnKind::Numeric)
        .map(|c| (c.name.clone(), c.numbers().sum()))
        .collect()
}

/// The table as CSV text, same format as the written output file.
pub fn to_csv_string(table: &CanonicalTable) -> Result<String, WriteError> {
    let mut buffer = Vec::new();
    CsvSink.write_to(table, &mut buffer, std::path::Path::new("<memory>"))?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RawTable;
    use crate::table::RawValue::{Null, Text};
    use crate::transform::{transform, TransformConfig};

    fn sample() -> CanonicalTable {
        let raw = RawTable {
            columns: vec!["Country".into(), "Cases".into(), "Date".into()],
            rows: vec![
                vec![Text("USA".into()), Text("100".into()), Text("2020-03-01".into())],
                vec![Text("India".into()), Text("40".into()), Text("2020-03-02".into())],
                vec![Text("Brazil".into()), Null, Text("2020-03-03".into())],
                vec![Text("USA".into()), Text("7".into()), Null],
            ],
        };
        transform(&raw, &TransformConfig::default()).unwrap()
    }

    #[test]
    fn filters_combine_and_drop_missing_values() {
        let table = sample();
        let filters = vec![
            Filter::parse_one_of("country=USA|Brazil").unwrap(),
            Filter::parse_range("Cases=0..1000", &table).unwrap(),
        ];
        let view = apply(&table, &filters).unwrap();
        assert_eq!(view.row_count(), 2);
        assert_eq!(totals(&view), vec![("cases".to_string(), 107.0)]);
    }

    #[test]
    fn timestamp_range_becomes_between() {
        let table = sample();
        let filter = Filter::parse_range("date=2020-03-02..2020-03-03", &table).unwrap();
        assert!(matches!(filter, Filter::Between { .. }));
        let view = apply(&table, &[filter]).unwrap();
        assert_eq!(view.row_count(), 2);
    }

    #[test]
    fn unknown_and_mismatched_columns_are_rejected() {
        let table = sample();
        let unknown = Filter::OneOf {
            column: "region".into(),
            values: vec![],
        };
        assert_eq!(
            apply(&table, &[unknown]),
            Err(ViewError::UnknownColumn("region".into()))
        );
        let mismatch = Filter::Range {
            column: "country".into(),
            min: 0.0,
            max: 1.0,
        };
        assert!(matches!(
            apply(&table, &[mismatch]),
            Err(ViewError::KindMismatch { .. })
        ));
        assert!(matches!(
            Filter::parse_range("cases=10", &table),
            Err(ViewError::InvalidExpression(_))
        ));
    }

    #[test]
    fn csv_export_matches_written_format() {
        let table = sample();
        let csv = to_csv_string(&table).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("country,cases,date"));
        assert_eq!(lines.next(), Some("USA,100,2020-03-01"));
        assert_eq!(lines.nth(1), Some("Brazil,,2020-03-03"));
    }
}
