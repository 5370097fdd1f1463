//! Error taxonomy for the pipeline.
//!
//! Each component returns its own error type; the orchestrator wraps the first
//! failure in [`RunError`], tagged with the [`Stage`] it came from, and never
//! recovers from any of them.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Pipeline stage a run failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reader,
    Transformer,
    Writer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Reader => "Reader",
            Stage::Transformer => "Transformer",
            Stage::Writer => "Writer",
        };
        f.write_str(name)
    }
}

/// Network fetch failure. Never retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("GET {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("GET {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("failed to build HTTP client: {reason}")]
    Client { reason: String },
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("unsupported data source: {0:?} (expected a .csv/.json path or an http(s) URL)")]
    UnsupportedSource(String),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSV in {origin}: {source}")]
    Csv {
        origin: String,
        #[source]
        source: csv::Error,
    },
    #[error("malformed JSON in {origin}: {reason}")]
    Json { origin: String, reason: String },
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("empty table: {rows} rows, {columns} columns")]
    EmptyTable { rows: usize, columns: usize },
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV serialization failed for {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Failure of one pipeline run, tagged by originating stage.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("[Reader] {0}")]
    Reader(#[from] ReadError),
    #[error("[Transformer] {0}")]
    Transformer(#[from] TransformError),
    #[error("[Writer] {0}")]
    Writer(#[from] WriteError),
}

impl RunError {
    pub fn stage(&self) -> Stage {
        match self {
            RunError::Reader(_) => Stage::Reader,
            RunError::Transformer(_) => Stage::Transformer,
            RunError::Writer(_) => Stage::Writer,
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot watch {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum ViewError {
    #[error("unknown column {0:?}")]
    UnknownColumn(String),
    #[error("filter on {column:?} expects a {expected} column")]
    KindMismatch {
        column: String,
        expected: &'static str,
    },
    #[error("invalid filter expression {0:?}")]
    InvalidExpression(String),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("nothing to report: table has no rows")]
    EmptyTable,
    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
