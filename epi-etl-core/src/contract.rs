//! Seams between the pipeline and the outside world.
//!
//! Every side-effecting collaborator of the pipeline sits behind one of these
//! traits so it can be swapped for a mock or a synthetic implementation:
//!
//! - [`Fetcher`]: network fetch of a remote source body (reqwest in production,
//!   `MockFetcher` in tests).
//! - [`TableSink`]: serialization of a canonical table into a byte stream.
//! - [`RunHandler`]: anything that can execute a [`RunRequest`]; implemented by
//!   the pipeline and consumed by the change trigger.
//! - [`FileEventSource`]: the filesystem watch capability.
//!
//! Request and report types are plain data.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::BoxStream;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{FetchError, RunError, WatchError, WriteError};
use crate::table::CanonicalTable;

/// One pipeline execution: where to read from and where to write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Locator string: a `.csv`/`.json` path or an http(s) URL.
    pub input: String,
    pub output: PathBuf,
}

impl RunRequest {
    pub fn new(input: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportedColumn {
    pub name: String,
    pub kind: String,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Correlates log lines of one run; not part of any output.
    pub run_id: Uuid,
    pub input: String,
    pub output: PathBuf,
    pub rows_read: usize,
    pub rows_written: usize,
    pub duplicates_removed: usize,
    pub columns: Vec<ReportedColumn>,
    /// Hex SHA-256 of the bytes written to `output`.
    pub output_sha256: String,
    pub elapsed_ms: u64,
}

/// Fetches the body of a remote source.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the body; non-success statuses are errors.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Serializes a canonical table.
pub trait TableSink: Send + Sync {
    /// Write `table` to `out`. `path` names the final destination for error reporting.
    fn write_to(
        &self,
        table: &CanonicalTable,
        out: &mut dyn Write,
        path: &Path,
    ) -> Result<(), WriteError>;
}

/// Executes pipeline runs on behalf of the change trigger.
#[async_trait]
pub trait RunHandler: Send + Sync + 'static {
    async fn handle(&self, request: RunRequest) -> Result<RunReport, RunError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FileEventKind::Created,
        }
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FileEventKind::Modified,
        }
    }
}

/// Filesystem watch capability.
pub trait FileEventSource: Send + Sync {
    /// Stream create/modify events for files directly inside `directory` whose
    /// name ends with one of `suffixes`.
    fn subscribe(
        &self,
        directory: &Path,
        suffixes: &[String],
    ) -> Result<BoxStream<'static, FileEvent>, WatchError>;
}

/// Case-insensitive filename suffix match.
pub fn matches_suffix(path: &Path, suffixes: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    suffixes
        .iter()
        .any(|s| name.ends_with(&s.to_ascii_lowercase()))
}
