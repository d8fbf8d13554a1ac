//! Filesystem watcher feeding the pipeline.
//!
//! Uses a debounced notify watcher so bursts of events during a download
//! collapse into one task per file. Obvious non-candidates (directories,
//! symlinks, hidden files, partial-download suffixes) are filtered here so
//! the pipeline only sees plausible work.

use std::path::Path;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::pipeline::FileTask;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Suffixes browsers and download managers use for in-progress files.
const PARTIAL_SUFFIXES: &[&str] = &[".tmp", ".crdownload", ".part", ".download", ".partial"];

/// Running watcher over the source directory. Dropping it stops watching.
pub struct SourceWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl SourceWatcher {
    /// Watch `source` (non-recursively) and send one [`FileTask`] per
    /// settled file event into `tx`.
    pub fn spawn(source: &Path, tx: mpsc::Sender<FileTask>) -> notify::Result<Self> {
        let mut debouncer = new_debouncer(
            DEBOUNCE_WINDOW,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    for event in events {
                        dispatch_event(&event, &tx);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        error!(error = %e, "watcher error");
                    }
                }
            },
        )?;

        debouncer.watch(source, RecursiveMode::NonRecursive)?;
        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

fn dispatch_event(event: &DebouncedEvent, tx: &mpsc::Sender<FileTask>) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }

    for path in &event.paths {
        if !is_candidate(path) {
            continue;
        }
        debug!(path = %path.display(), "enqueueing file event");
        // The debouncer runs on its own thread, so a blocking send is safe.
        if tx.blocking_send(FileTask { path: path.clone() }).is_err() {
            warn!("pipeline channel closed, dropping event");
            return;
        }
    }
}

/// Filter out events that can never become pipeline work.
fn is_candidate(path: &Path) -> bool {
    let meta = match path.symlink_metadata() {
        Ok(meta) => meta,
        Err(_) => return false,
    };
    // Symlinks are rejected here as well as in validation: the watcher must
    // never hand the pipeline a path that follows a link out of the source.
    if !meta.file_type().is_file() {
        return false;
    }

    let name = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return false,
    };
    if name.starts_with('.') {
        return false;
    }
    if PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn regular_files_are_candidates() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("photo.jpg");
        std::fs::write(&file, b"jpeg").unwrap();
        assert!(is_candidate(&file));
    }

    #[test]
    fn hidden_and_partial_files_are_filtered() {
        let dir = TempDir::new().unwrap();
        for name in [".DS_Store", "movie.mkv.part", "setup.exe.crdownload", "x.tmp"] {
            let file = dir.path().join(name);
            std::fs::write(&file, b"x").unwrap();
            assert!(!is_candidate(&file), "expected filter for {name}");
        }
    }

    #[test]
    fn directories_and_missing_paths_are_filtered() {
        let dir = TempDir::new().unwrap();
        assert!(!is_candidate(dir.path()));
        assert!(!is_candidate(&dir.path().join("missing.txt")));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_filtered() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("real.txt");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert!(!is_candidate(&link));
    }

    #[tokio::test]
    async fn created_file_produces_a_task() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let _watcher = SourceWatcher::spawn(dir.path(), tx).unwrap();

        let file = dir.path().join("incoming.pdf");
        std::fs::write(&file, b"pdf bytes").unwrap();

        let task = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher never delivered the event")
            .expect("channel closed");
        assert_eq!(task.path, file);
    }
}
