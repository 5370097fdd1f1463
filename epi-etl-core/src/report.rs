//! PDF summary report of a canonical table.
//!
//! One A4 portrait document in Courier: title, generation time, row count, then
//! one block per column (kind, non-missing and distinct counts, numeric
//! mean/min/max or timestamp first/last). Lines flow onto further pages.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, Point, Pt, TextItem,
};
use tracing::{debug, error, info, warn};

use crate::error::ReportError;
use crate::table::{CanonicalTable, Column, ColumnKind};

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const LEFT_MARGIN: Mm = Mm(15.0);
const TOP: Mm = Mm(280.0);
const FONT: BuiltinFont = BuiltinFont::Courier;
const FONT_SIZE: Pt = Pt(10.0);
const LINE_HEIGHT: Pt = Pt(12.0);
const LINES_PER_PAGE: usize = 60;
const MAX_LINE_CHARS: usize = 86;

fn clip(line: String) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        return line;
    }
    let mut clipped: String = line.chars().take(MAX_LINE_CHARS - 3).collect();
    clipped.push_str("...");
    clipped
}

fn column_lines(column: &Column) -> Vec<String> {
    let mut lines = vec![
        format!("{} ({})", column.name, column.kind.name()),
        format!(
            "  non-missing: {}   distinct: {}",
            column.non_missing(),
            column.distinct_count()
        ),
    ];
    match &column.kind {
        ColumnKind::Numeric => {
            if let (Some(mean), Some(min), Some(max)) = (column.mean(), column.min(), column.max()) {
                lines.push(format!("  mean: {mean:.2}   min: {min:.2}   max: {max:.2}"));
            }
        }
        ColumnKind::Timestamp => {
            if let (Some(first), Some(last)) = (column.timestamps().min(), column.timestamps().max()) {
                lines.push(format!("  first: {first}   last: {last}"));
            }
        }
        ColumnKind::Categorical { levels } => {
            let joined: Vec<&str> = levels.iter().map(String::as_str).collect();
            lines.push(format!("  levels: {}", joined.join(", ")));
        }
        ColumnKind::Text => {}
    }
    lines.into_iter().map(clip).collect()
}

fn report_lines(table: &CanonicalTable, generated_at: NaiveDateTime) -> Vec<String> {
    let mut lines = vec![
        "ETL Summary Report".to_string(),
        format!("Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S")),
        format!("Total rows: {}", table.row_count()),
        format!("Columns: {}", table.column_count()),
        String::new(),
    ];
    for column in table.columns() {
        lines.extend(column_lines(column));
        lines.push(String::new());
    }
    lines
}

fn page(lines: &[String]) -> PdfPage {
    let mut ops = vec![
        Op::StartTextSection,
        Op::SetTextCursor {
            pos: Point::new(LEFT_MARGIN, TOP),
        },
        Op::SetFontSizeBuiltinFont {
            size: FONT_SIZE,
            font: FONT,
        },
        Op::SetLineHeight { lh: LINE_HEIGHT },
    ];
    for line in lines {
        ops.push(Op::WriteTextBuiltinFont {
            items: vec![TextItem::Text(line.clone())],
            font: FONT,
        });
        ops.push(Op::AddLineBreak);
    }
    ops.push(Op::EndTextSection);
    PdfPage::new(PAGE_WIDTH, PAGE_HEIGHT, ops)
}

/// Renders the summary report to PDF bytes.
pub fn render_pdf(table: &CanonicalTable, generated_at: NaiveDateTime) -> Result<Vec<u8>, ReportError> {
    if table.row_count() == 0 {
        error!("[REPORT] Refusing to summarise an empty table");
        return Err(ReportError::EmptyTable);
    }

    let lines = report_lines(table, generated_at);
    let pages: Vec<PdfPage> = lines.chunks(LINES_PER_PAGE).map(page).collect();
    debug!(lines = lines.len(), pages = pages.len(), "[REPORT] Laid out report");

    let mut warnings = Vec::new();
    let bytes = PdfDocument::new("ETL Summary Report")
        .with_pages(pages)
        .save(&PdfSaveOptions::default(), &mut warnings);
    if !warnings.is_empty() {
        warn!(count = warnings.len(), "[REPORT] PDF serializer reported warnings");
    }
    Ok(bytes)
}

/// File name for a report generated at `generated_at`.
pub fn report_file_name(generated_at: NaiveDateTime) -> String {
    format!("etl_report_{}.pdf", generated_at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Renders the report into `reports_dir` (created if needed) and returns its path.
pub fn write_report(
    table: &CanonicalTable,
    reports_dir: &Path,
    generated_at: NaiveDateTime,
) -> Result<PathBuf, ReportError> {
    let bytes = render_pdf(table, generated_at)?;
    let path = reports_dir.join(report_file_name(generated_at));
    let io_error = |source| ReportError::Io {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(reports_dir).map_err(io_error)?;
    fs::write(&path, &bytes).map_err(io_error)?;
    info!(path = %path.display(), bytes = bytes.len(), "[REPORT] Report written");
    Ok(path)
}
