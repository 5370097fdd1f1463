use epi_etl_core::contract::{FileEvent, FileEventKind, FileEventSource, MockFetcher};
use epi_etl_core::error::WatchError;
use epi_etl_core::trigger::{ChangeTrigger, WatchConfig};
use epi_etl_core::watch::PollingWatcher;
use epi_etl_core::write::CsvSink;
use epi_etl_core::{Pipeline, PipelineConfig};
use futures::stream::{BoxStream, StreamExt};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const POLL: Duration = Duration::from_millis(20);

fn suffixes() -> Vec<String> {
    vec![".csv".to_string()]
}

/// Writes under a non-matching name and renames, so a scan never sees a half-written file.
fn place(path: &Path, contents: &str) {
    let staging = path.with_extension("part");
    fs::write(&staging, contents).unwrap();
    fs::rename(&staging, path).unwrap();
}

async fn next_event(events: &mut BoxStream<'static, FileEvent>) -> FileEvent {
    tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("no event within 5s")
        .expect("stream ended")
}

#[tokio::test]
async fn new_and_changed_files_are_reported_but_the_baseline_is_not() {
    let dir = tempdir().unwrap();
    let existing = dir.path().join("existing.csv");
    fs::write(&existing, "a\n1\n").unwrap();

    let mut events = PollingWatcher::new(POLL)
        .subscribe(dir.path(), &suffixes())
        .unwrap();

    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    place(&dir.path().join("fresh.CSV"), "a\n1\n");
    let created = next_event(&mut events).await;
    assert_eq!(created.path, dir.path().join("fresh.CSV"));
    assert_eq!(created.kind, FileEventKind::Created);

    place(&existing, "a\n1\n2\n");
    let modified = next_event(&mut events).await;
    assert_eq!(modified, FileEvent::modified(&existing));
}

#[tokio::test]
async fn subscribing_to_a_missing_directory_fails() {
    let dir = tempdir().unwrap();
    let result = PollingWatcher::new(POLL).subscribe(&dir.path().join("absent"), &suffixes());
    assert!(matches!(result, Err(WatchError::Io { .. })));
}

#[tokio::test]
async fn watched_file_is_cleaned_end_to_end() {
    let dir = tempdir().unwrap();
    let watch = WatchConfig {
        directory: dir.path().to_path_buf(),
        output_dir: dir.path().join("cleaned"),
        poll_interval_ms: 20,
        ..WatchConfig::default()
    };
    let pipeline = Pipeline::with_parts(PipelineConfig::default(), MockFetcher::new(), CsvSink);
    let trigger = ChangeTrigger::new(Arc::new(pipeline), watch.clone());

    let watcher = PollingWatcher::new(watch.poll_interval());
    let running = trigger.clone();
    let task = tokio::spawn(async move { running.watch(&watcher).await });

    // Let the watcher take its baseline before the file appears.
    tokio::time::sleep(Duration::from_millis(100)).await;
    place(&dir.path().join("cases.csv"), "Country,Cases\nUSA,1\n");

    let output = dir.path().join("cleaned/cleaned_cases.csv");
    let mut waited = Duration::ZERO;
    while !output.exists() && waited < Duration::from_secs(5) {
        tokio::time::sleep(POLL).await;
        waited += POLL;
    }

    trigger.shutdown();
    let summary = task.await.unwrap().unwrap();
    assert!(summary.started >= 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(fs::read_to_string(output).unwrap(), "country,cases\nUSA,1\n");
}
