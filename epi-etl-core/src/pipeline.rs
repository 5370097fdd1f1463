//! Pipeline orchestrator: Reader, then Transformer, then Writer.
//!
//! A run either replaces its output file completely or leaves it untouched;
//! the first failing stage aborts the run and tags the returned [`RunError`].
//! Nothing is retried here. Callers that want retries re-submit the request.
//!
//! # Entry points
//! - [`Pipeline::run_default`]: the configured well-known input/output pair.
//! - [`Pipeline::run`]: an explicit [`RunRequest`].
//! - [`Pipeline::extract`]: Reader and Transformer only, for ad hoc consumers
//!   that never persist (dashboards, reports).
//! - [`Pipeline::run_directory`]: every CSV file of a directory, each into its
//!   own `cleaned_<stem>.csv`, continuing past failures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::contract::{matches_suffix, Fetcher, ReportedColumn, RunHandler, RunReport, RunRequest, TableSink};
use crate::error::{ReadError, RunError};
use crate::read::{HttpFetcher, Locator, SourceReader};
use crate::table::CanonicalTable;
use crate::transform::{transform, TransformConfig, DEFAULT_CATEGORICAL_RATIO};
use crate::write::{write_atomic, CsvSink};

/// Prefix of per-file outputs produced by batch and watch runs.
pub const DEFAULT_OUTPUT_PREFIX: &str = "cleaned_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Locator used by [`Pipeline::run_default`].
    pub default_input: String,
    /// Destination used by [`Pipeline::run_default`].
    pub default_output: PathBuf,
    pub fetch_timeout_secs: u64,
    pub categorical_ratio: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_input: "data/worldometer_data.csv".to_string(),
            default_output: PathBuf::from("data/etl_output.csv"),
            fetch_timeout_secs: 30,
            categorical_ratio: DEFAULT_CATEGORICAL_RATIO,
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn transform_config(&self) -> TransformConfig {
        TransformConfig {
            categorical_ratio: self.categorical_ratio,
        }
    }
}

/// Result of one file of a [`Pipeline::run_directory`] batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    pub result: Result<RunReport, RunError>,
}

/// `output_dir/<prefix><stem>.csv` for an input file.
pub fn cleaned_output_path(input: &Path, output_dir: &Path, prefix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{prefix}{stem}.csv"))
}

pub struct Pipeline<F = HttpFetcher, S = CsvSink> {
    config: PipelineConfig,
    reader: SourceReader<F>,
    sink: S,
}

impl Pipeline {
    /// Production pipeline: reqwest fetcher and CSV sink.
    pub fn new(config: PipelineConfig) -> Result<Self, RunError> {
        let fetcher = HttpFetcher::new(config.fetch_timeout()).map_err(ReadError::from)?;
        Ok(Self::with_parts(config, fetcher, CsvSink))
    }
}

impl<F: Fetcher, S: TableSink> Pipeline<F, S> {
    pub fn with_parts(config: PipelineConfig, fetcher: F, sink: S) -> Self {
        let reader = SourceReader::new(fetcher, config.fetch_timeout());
        Self {
            config,
            reader,
            sink,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run_default(&self) -> Result<RunReport, RunError> {
        let request = RunRequest::new(
            self.config.default_input.clone(),
            self.config.default_output.clone(),
        );
        self.run(request).await
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, input = %request.input);
        async move {
            let started = Instant::now();
            info!(output = %request.output.display(), "[RUN] Starting ETL run");
            match self.execute(run_id, &request, started).await {
                Ok(report) => {
                    info!(
                        rows_written = report.rows_written,
                        duplicates_removed = report.duplicates_removed,
                        elapsed_ms = report.elapsed_ms,
                        "[RUN] ETL run completed"
                    );
                    Ok(report)
                }
                Err(e) => {
                    error!(stage = %e.stage(), error = %e, "[RUN] ETL run failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        request: &RunRequest,
        started: Instant,
    ) -> Result<RunReport, RunError> {
        let locator = Locator::parse(&request.input)?;
        let raw = self.reader.read(&locator).await?;
        let rows_read = raw.row_count();

        let table = transform(&raw, &self.config.transform_config())?;
        drop(raw);

        let written = write_atomic(&self.sink, &table, &request.output)?;

        Ok(RunReport {
            run_id,
            input: request.input.clone(),
            output: request.output.clone(),
            rows_read,
            rows_written: table.row_count(),
            duplicates_removed: rows_read - table.row_count(),
            columns: table
                .columns()
                .iter()
                .map(|c| ReportedColumn {
                    name: c.name.clone(),
                    kind: c.kind.name().to_string(),
                })
                .collect(),
            output_sha256: written.sha256,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Reader and Transformer only; nothing is written.
    pub async fn extract(&self, input: &str) -> Result<CanonicalTable, RunError> {
        let locator = Locator::parse(input)?;
        let raw = self.reader.read(&locator).await?;
        let table = transform(&raw, &self.config.transform_config())?;
        info!(input, rows = table.row_count(), "[RUN] Extracted canonical table");
        Ok(table)
    }

    /// Runs every `.csv` file directly inside `input_dir`, in name order.
    ///
    /// Fails only if `input_dir` cannot be listed; per-file failures are
    /// reported in the returned outcomes.
    pub async fn run_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<Vec<BatchOutcome>, RunError> {
        let entries = fs::read_dir(input_dir).map_err(|source| ReadError::Io {
            path: input_dir.to_path_buf(),
            source,
        })?;
        let suffixes = [".csv".to_string()];
        let mut inputs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && matches_suffix(path, &suffixes))
            .collect();
        inputs.sort();
        info!(directory = %input_dir.display(), files = inputs.len(), "[BATCH] Processing directory");

        let mut outcomes = Vec::with_capacity(inputs.len());
        for input in inputs {
            let output = cleaned_output_path(&input, output_dir, DEFAULT_OUTPUT_PREFIX);
            info!(file = %input.display(), "[BATCH] Processing file");
            let request = RunRequest::new(input.to_string_lossy(), output.clone());
            let result = self.run(request).await;
            outcomes.push(BatchOutcome {
                input,
                output,
                result,
            });
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl<F, S> RunHandler for Pipeline<F, S>
where
    F: Fetcher + 'static,
    S: TableSink + 'static,
{
    async fn handle(&self, request: RunRequest) -> Result<RunReport, RunError> {
        self.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaned_output_path_uses_prefix_and_stem() {
        assert_eq!(
            cleaned_output_path(Path::new("data/Worldometer_Data.CSV"), Path::new("out"), "cleaned_"),
            PathBuf::from("out/cleaned_Worldometer_Data.csv")
        );
    }
}
