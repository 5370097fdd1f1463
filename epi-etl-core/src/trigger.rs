//! Change trigger: re-runs the pipeline when a watched file is created or modified.
//!
//! Each input file is either `Idle` or `Running`. A qualifying event moves an
//! idle file to running and dispatches a run on a tokio task; events for a
//! running file are coalesced (dropped, not queued). The file returns to idle
//! when its run finishes, whatever the outcome, because the in-flight marker is
//! owned by a guard that the worker task drops.
//!
//! The marker is claimed on the dispatching task before the spawn, so there is
//! no window in which two runs of one file can both be admitted.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::contract::{matches_suffix, FileEvent, FileEventSource, RunHandler, RunReport, RunRequest};
use crate::error::{RunError, WatchError};
use crate::pipeline::{cleaned_output_path, DEFAULT_OUTPUT_PREFIX};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory watched, non-recursively.
    pub directory: PathBuf,
    /// Case-insensitive filename suffixes that qualify, e.g. `.csv`.
    pub suffixes: Vec<String>,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            suffixes: vec![".csv".to_string()],
            output_dir: PathBuf::from("data/cleaned"),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            poll_interval_ms: 1000,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Where the run for `input` writes its output.
    pub fn output_for(&self, input: &Path) -> PathBuf {
        cleaned_output_path(input, &self.output_dir, &self.output_prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Idle,
    Running,
}

/// What [`ChangeTrigger::on_event`] did with an event.
#[derive(Debug)]
pub enum Dispatch {
    /// A run was started; the handle resolves with its outcome.
    Started(JoinHandle<Result<RunReport, RunError>>),
    /// The file already has a run in flight.
    Coalesced,
    /// The file does not match any watched suffix.
    Ignored,
}

/// Counters for one [`ChangeTrigger::watch`] session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub started: usize,
    pub coalesced: usize,
    pub ignored: usize,
    pub succeeded: usize,
    pub failed: usize,
}

type InFlight = Arc<Mutex<HashSet<PathBuf>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<PathBuf>> {
    // A poisoned set is still consistent: every mutation is a single insert or remove.
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Releases a file's in-flight marker on drop.
struct InFlightGuard {
    in_flight: InFlight,
    path: PathBuf,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.path);
        debug!(file = %self.path.display(), "[TRIGGER] File back to idle");
    }
}

pub struct ChangeTrigger<H> {
    handler: Arc<H>,
    config: WatchConfig,
    /// Input whose runs refresh the canonical output instead of a cleaned copy.
    canonical: Option<(PathBuf, PathBuf)>,
    in_flight: InFlight,
    shutdown: Arc<Notify>,
}

impl<H> Clone for ChangeTrigger<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
            canonical: self.canonical.clone(),
            in_flight: Arc::clone(&self.in_flight),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<H: RunHandler> ChangeTrigger<H> {
    pub fn new(handler: Arc<H>, config: WatchConfig) -> Self {
        Self {
            handler,
            config,
            canonical: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Routes runs for `input` to `output`, the file downstream readers load
    /// by default. Other files keep their `cleaned_` copies.
    pub fn with_canonical(mut self, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        self.canonical = Some((input.into(), output.into()));
        self
    }

    /// Where the run for `input` writes its output.
    pub fn output_for(&self, input: &Path) -> PathBuf {
        match &self.canonical {
            Some((canonical_input, output)) if same_file(input, canonical_input) => output.clone(),
            _ => self.config.output_for(input),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn state(&self, path: &Path) -> FileState {
        if lock(&self.in_flight).contains(path) {
            FileState::Running
        } else {
            FileState::Idle
        }
    }

    /// Handles one filesystem event. Must be called from within a tokio runtime.
    pub fn on_event(&self, event: &FileEvent) -> Dispatch {
        if !matches_suffix(&event.path, &self.config.suffixes) {
            debug!(file = %event.path.display(), "[TRIGGER] Ignoring non-matching file");
            return Dispatch::Ignored;
        }

        if !lock(&self.in_flight).insert(event.path.clone()) {
            info!(file = %event.path.display(), kind = ?event.kind, "[TRIGGER] Run in flight, coalescing event");
            return Dispatch::Coalesced;
        }
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            path: event.path.clone(),
        };

        let request = RunRequest::new(
            event.path.to_string_lossy(),
            self.output_for(&event.path),
        );
        info!(
            file = %event.path.display(),
            kind = ?event.kind,
            output = %request.output.display(),
            "[TRIGGER] Change detected, starting run"
        );

        let handler = Arc::clone(&self.handler);
        Dispatch::Started(tokio::spawn(async move {
            let _guard = guard;
            let file = request.input.clone();
            let result = handler.handle(request).await;
            match &result {
                Ok(report) => info!(file = %file, rows = report.rows_written, "[TRIGGER] Run succeeded"),
                Err(e) => error!(file = %file, stage = %e.stage(), error = %e, "[TRIGGER] Run failed"),
            }
            result
        }))
    }

    /// Stops a running [`watch`](Self::watch) after its in-flight runs finish.
    /// A signal sent before `watch` starts is remembered.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Dispatches events from `source` until the stream ends or
    /// [`shutdown`](Self::shutdown) is called, then waits for in-flight runs.
    pub async fn watch<E>(&self, source: &E) -> Result<WatchSummary, WatchError>
    where
        E: FileEventSource + ?Sized,
    {
        let mut events = source.subscribe(&self.config.directory, &self.config.suffixes)?;
        info!(
            directory = %self.config.directory.display(),
            suffixes = ?self.config.suffixes,
            "[TRIGGER] Watching for changes"
        );

        let mut summary = WatchSummary::default();
        let mut running = FuturesUnordered::new();
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("[TRIGGER] Shutdown requested");
                    break;
                }
                Some(done) = running.next(), if !running.is_empty() => tally(&mut summary, done),
                next = events.next() => match next {
                    Some(event) => match self.on_event(&event) {
                        Dispatch::Started(handle) => {
                            summary.started += 1;
                            running.push(handle);
                        }
                        Dispatch::Coalesced => summary.coalesced += 1,
                        Dispatch::Ignored => summary.ignored += 1,
                    },
                    None => {
                        warn!("[TRIGGER] Event stream ended");
                        break;
                    }
                },
            }
        }

        if !running.is_empty() {
            info!(in_flight = running.len(), "[TRIGGER] Waiting for in-flight runs");
        }
        while let Some(done) = running.next().await {
            tally(&mut summary, done);
        }
        info!(?summary, "[TRIGGER] Watch stopped");
        Ok(summary)
    }
}

fn tally(summary: &mut WatchSummary, done: Result<Result<RunReport, RunError>, JoinError>) {
    match done {
        Ok(Ok(_)) => summary.succeeded += 1,
        Ok(Err(_)) => summary.failed += 1,
        Err(e) => {
            error!(error = %e, "[TRIGGER] Run task aborted");
            summary.failed += 1;
        }
    }
}
