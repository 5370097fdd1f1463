//! Polling implementation of [`FileEventSource`].
//!
//! Scans the directory (non-recursively) on a fixed interval and diffs
//! modification time and length against the previous scan. Files already
//! present at subscribe time form the baseline and produce no events.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::contract::{matches_suffix, FileEvent, FileEventSource};
use crate::error::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signature {
    modified: Option<SystemTime>,
    len: u64,
}

type Snapshot = BTreeMap<PathBuf, Signature>;

fn scan(directory: &Path, suffixes: &[String]) -> io::Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();
        if !matches_suffix(&path, suffixes) {
            continue;
        }
        // Files can vanish between listing and stat.
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        snapshot.insert(
            path,
            Signature {
                modified: metadata.modified().ok(),
                len: metadata.len(),
            },
        );
    }
    Ok(snapshot)
}

fn diff(previous: &Snapshot, current: &Snapshot) -> Vec<FileEvent> {
    current
        .iter()
        .filter_map(|(path, signature)| match previous.get(path) {
            None => Some(FileEvent::created(path.clone())),
            Some(old) if old != signature => Some(FileEvent::modified(path.clone())),
            Some(_) => None,
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct PollingWatcher {
    interval: Duration,
}

impl PollingWatcher {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl FileEventSource for PollingWatcher {
    /// Spawns the scan task; must be called from within a tokio runtime. The
    /// task ends once the returned stream is dropped.
    fn subscribe(
        &self,
        directory: &Path,
        suffixes: &[String],
    ) -> Result<BoxStream<'static, FileEvent>, WatchError> {
        let baseline = scan(directory, suffixes).map_err(|source| WatchError::Io {
            path: directory.to_path_buf(),
            source,
        })?;
        info!(
            directory = %directory.display(),
            files = baseline.len(),
            interval = ?self.interval,
            "[WATCH] Polling directory"
        );

        let (tx, rx) = mpsc::unbounded();
        let directory = directory.to_path_buf();
        let suffixes = suffixes.to_vec();
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            let mut previous = baseline;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let current = match scan(&directory, &suffixes) {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(directory = %directory.display(), error = ?e, "[WATCH] Scan failed, retrying next tick");
                        continue;
                    }
                };
                for event in diff(&previous, &current) {
                    debug!(file = %event.path.display(), kind = ?event.kind, "[WATCH] File changed");
                    if tx.unbounded_send(event).is_err() {
                        return;
                    }
                }
                previous = current;
            }
            debug!(directory = %directory.display(), "[WATCH] Subscriber gone, polling stopped");
        });

        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::FileEventKind;

    fn signature(len: u64) -> Signature {
        Signature {
            modified: None,
            len,
        }
    }

    #[test]
    fn diff_reports_new_and_changed_files_only() {
        let previous = Snapshot::from([
            (PathBuf::from("d/a.csv"), signature(1)),
            (PathBuf::from("d/b.csv"), signature(2)),
        ]);
        let current = Snapshot::from([
            (PathBuf::from("d/a.csv"), signature(1)),
            (PathBuf::from("d/b.csv"), signature(3)),
            (PathBuf::from("d/c.csv"), signature(4)),
        ]);

        let events = diff(&previous, &current);
        assert_eq!(
            events,
            vec![
                FileEvent {
                    path: PathBuf::from("d/b.csv"),
                    kind: FileEventKind::Modified
                },
                FileEvent {
                    path: PathBuf::from("d/c.csv"),
                    kind: FileEventKind::Created
                },
            ]
        );
    }
}
