use async_trait::async_trait;
use epi_etl_core::contract::{
    FileEvent, FileEventSource, MockFetcher, RunHandler, RunReport, RunRequest,
};
use epi_etl_core::error::{RunError, TransformError, WatchError};
use epi_etl_core::trigger::{ChangeTrigger, Dispatch, FileState, WatchConfig, WatchSummary};
use epi_etl_core::write::CsvSink;
use epi_etl_core::{Pipeline, PipelineConfig};
use futures::stream::{self, BoxStream, StreamExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Semaphore;
use uuid::Uuid;

fn report_for(request: &RunRequest) -> RunReport {
    RunReport {
        run_id: Uuid::nil(),
        input: request.input.clone(),
        output: request.output.clone(),
        rows_read: 0,
        rows_written: 0,
        duplicates_removed: 0,
        columns: vec![],
        output_sha256: String::new(),
        elapsed_ms: 0,
    }
}

/// Records requests and blocks each run until a permit is released.
struct GatedHandler {
    gate: Semaphore,
    requests: Mutex<Vec<RunRequest>>,
}

impl GatedHandler {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RunHandler for GatedHandler {
    async fn handle(&self, request: RunRequest) -> Result<RunReport, RunError> {
        self.requests.lock().unwrap().push(request.clone());
        self.gate.acquire().await.unwrap().forget();
        Ok(report_for(&request))
    }
}

fn config() -> WatchConfig {
    WatchConfig {
        directory: PathBuf::from("data"),
        output_dir: PathBuf::from("data/cleaned"),
        ..WatchConfig::default()
    }
}

#[tokio::test]
async fn events_for_a_running_file_are_coalesced() {
    let handler = Arc::new(GatedHandler::new());
    let trigger = ChangeTrigger::new(handler.clone(), config());
    let a = Path::new("data/a.csv");

    let Dispatch::Started(first) = trigger.on_event(&FileEvent::created(a)) else {
        panic!("first event should start a run");
    };
    assert_eq!(trigger.state(a), FileState::Running);
    for _ in 0..5 {
        assert!(matches!(
            trigger.on_event(&FileEvent::modified(a)),
            Dispatch::Coalesced
        ));
    }

    let Dispatch::Started(other) = trigger.on_event(&FileEvent::modified("data/b.CSV")) else {
        panic!("another file should run independently");
    };
    assert!(matches!(
        trigger.on_event(&FileEvent::created("data/notes.txt")),
        Dispatch::Ignored
    ));

    handler.gate.add_permits(2);
    let report = first.await.unwrap().unwrap();
    other.await.unwrap().unwrap();
    assert_eq!(report.output, PathBuf::from("data/cleaned/cleaned_a.csv"));
    assert_eq!(trigger.state(a), FileState::Idle);

    let Dispatch::Started(again) = trigger.on_event(&FileEvent::modified(a)) else {
        panic!("an idle file should run again");
    };
    handler.gate.add_permits(1);
    again.await.unwrap().unwrap();

    let inputs: Vec<String> = handler
        .requests
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.input.clone())
        .collect();
    assert_eq!(inputs, vec!["data/a.csv", "data/b.CSV", "data/a.csv"]);
}

struct FailingHandler;

#[async_trait]
impl RunHandler for FailingHandler {
    async fn handle(&self, _request: RunRequest) -> Result<RunReport, RunError> {
        Err(TransformError::EmptyTable {
            rows: 0,
            columns: 0,
        }
        .into())
    }
}

struct PanickingHandler;

#[async_trait]
impl RunHandler for PanickingHandler {
    async fn handle(&self, _request: RunRequest) -> Result<RunReport, RunError> {
        panic!("handler blew up");
    }
}

#[tokio::test]
async fn file_returns_to_idle_after_failure_or_panic() {
    let a = Path::new("data/a.csv");

    let failing = ChangeTrigger::new(Arc::new(FailingHandler), config());
    let Dispatch::Started(handle) = failing.on_event(&FileEvent::created(a)) else {
        panic!("expected a run");
    };
    assert!(handle.await.unwrap().is_err());
    assert_eq!(failing.state(a), FileState::Idle);

    let panicking = ChangeTrigger::new(Arc::new(PanickingHandler), config());
    let Dispatch::Started(handle) = panicking.on_event(&FileEvent::created(a)) else {
        panic!("expected a run");
    };
    assert!(handle.await.unwrap_err().is_panic());
    assert_eq!(panicking.state(a), FileState::Idle);
    assert!(matches!(
        panicking.on_event(&FileEvent::modified(a)),
        Dispatch::Started(_)
    ));
}

/// Replays a fixed list of events, then ends.
struct ScriptedSource(Vec<FileEvent>);

impl FileEventSource for ScriptedSource {
    fn subscribe(
        &self,
        _directory: &Path,
        _suffixes: &[String],
    ) -> Result<BoxStream<'static, FileEvent>, WatchError> {
        Ok(stream::iter(self.0.clone()).boxed())
    }
}

/// Sleeps for a while before succeeding.
struct SlowHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl RunHandler for SlowHandler {
    async fn handle(&self, request: RunRequest) -> Result<RunReport, RunError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(report_for(&request))
    }
}

#[tokio::test]
async fn watch_dispatches_a_burst_and_waits_for_in_flight_runs() {
    let handler = Arc::new(SlowHandler {
        calls: AtomicUsize::new(0),
    });
    let trigger = ChangeTrigger::new(handler.clone(), config());
    let source = ScriptedSource(vec![
        FileEvent::created("data/a.csv"),
        FileEvent::modified("data/a.csv"),
        FileEvent::modified("data/a.csv"),
        FileEvent::modified("data/a.csv"),
        FileEvent::created("data/b.csv"),
        FileEvent::created("data/b.json"),
    ]);

    let summary = trigger.watch(&source).await.unwrap();

    assert_eq!(
        summary,
        WatchSummary {
            started: 2,
            coalesced: 3,
            ignored: 1,
            succeeded: 2,
            failed: 0,
        }
    );
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(trigger.state(Path::new("data/a.csv")), FileState::Idle);
}

#[tokio::test]
async fn shutdown_before_watch_returns_immediately() {
    struct Forever;
    impl FileEventSource for Forever {
        fn subscribe(
            &self,
            _directory: &Path,
            _suffixes: &[String],
        ) -> Result<BoxStream<'static, FileEvent>, WatchError> {
            Ok(stream::pending().boxed())
        }
    }

    let trigger = ChangeTrigger::new(Arc::new(FailingHandler), config());
    trigger.shutdown();
    let summary = tokio::time::timeout(Duration::from_secs(5), trigger.watch(&Forever))
        .await
        .expect("watch should stop on shutdown")
        .unwrap();
    assert_eq!(summary, WatchSummary::default());
}

#[tokio::test]
async fn pipeline_runs_as_the_trigger_handler() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("Worldometer Data.csv");
    fs::write(&input, "Country,Cases\nUSA,3\nusa,3\n").unwrap();

    let pipeline = Pipeline::with_parts(PipelineConfig::default(), MockFetcher::new(), CsvSink);
    let watch = WatchConfig {
        directory: dir.path().to_path_buf(),
        output_dir: dir.path().join("cleaned"),
        ..WatchConfig::default()
    };
    let trigger = ChangeTrigger::new(Arc::new(pipeline), watch);

    let Dispatch::Started(handle) = trigger.on_event(&FileEvent::modified(&input)) else {
        panic!("expected a run");
    };
    let report = handle.await.unwrap().unwrap();

    let output = dir.path().join("cleaned/cleaned_Worldometer Data.csv");
    assert_eq!(report.output, output);
    assert_eq!(fs::read_to_string(output).unwrap(), "country,cases\nUSA,3\n");
}

#[tokio::test]
async fn default_input_refreshes_the_canonical_output() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("worldometer_data.csv");
    let other = dir.path().join("extra.csv");
    let canonical = dir.path().join("etl_output.csv");
    fs::write(&input, "Country,Cases\nUSA,3\n").unwrap();
    fs::write(&other, "Country,Cases\nPeru,1\n").unwrap();
    fs::write(&canonical, "country,cases\nstale,0\n").unwrap();

    let config = PipelineConfig {
        default_input: input.to_string_lossy().into_owned(),
        default_output: canonical.clone(),
        ..PipelineConfig::default()
    };
    let watch = WatchConfig {
        directory: dir.path().to_path_buf(),
        output_dir: dir.path().join("cleaned"),
        ..WatchConfig::default()
    };
    let pipeline = Pipeline::with_parts(config.clone(), MockFetcher::new(), CsvSink);
    let trigger = ChangeTrigger::new(Arc::new(pipeline), watch)
        .with_canonical(&config.default_input, &config.default_output);

    let Dispatch::Started(handle) = trigger.on_event(&FileEvent::modified(&input)) else {
        panic!("expected a run");
    };
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.output, canonical);
    assert_eq!(fs::read_to_string(&canonical).unwrap(), "country,cases\nUSA,3\n");
    assert!(!dir.path().join("cleaned/cleaned_worldometer_data.csv").exists());

    let Dispatch::Started(handle) = trigger.on_event(&FileEvent::created(&other)) else {
        panic!("expected a run");
    };
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.output, dir.path().join("cleaned/cleaned_extra.csv"));
    assert_eq!(fs::read_to_string(&canonical).unwrap(), "country,cases\nUSA,3\n");
}
