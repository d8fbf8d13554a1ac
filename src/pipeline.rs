//! Pipeline orchestration: one file event in, exactly one terminal out.
//!
//! Every task runs the same gauntlet: path validation, stability, scan,
//! then either archive expansion or classification and placement. Any
//! failure on the way routes the file to quarantine; quarantine failure is
//! the only way a task ends as `Failed`. Nested archives are walked with an
//! explicit worklist so expansion depth never grows the call stack, and one
//! accumulator spans the whole tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashSet;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveAccumulator, ArchiveExpander};
use crate::classify::{Category, Classify, ExtensionClassifier};
use crate::config::Config;
use crate::error::PipelineError;
use crate::organize::Organizer;
use crate::quarantine::{QuarantineRecord, QuarantineSink};
use crate::scanner::{ScanResult, SecurityScanner};
use crate::security::PathValidator;
use crate::stability::{Stability, StabilityChecker};

/// One file event picked up from the watched directory.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub path: PathBuf,
}

/// Terminal state of one task. Each task reaches exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Organized into the destination tree at this path.
    Placed(PathBuf),
    /// Moved to quarantine at this path.
    Quarantined(PathBuf),
    /// Dropped without touching the file (duplicate event, vanished file).
    Skipped(String),
    /// Could not be processed and could not be quarantined.
    Failed(String),
}

enum Gate {
    Pass,
    Blocked(ProcessingOutcome),
}

pub struct Orchestrator {
    validator: PathValidator,
    stability: StabilityChecker,
    scanner: Arc<dyn SecurityScanner>,
    scanner_enabled: bool,
    fail_closed: bool,
    expander: ArchiveExpander,
    classifier: ExtensionClassifier,
    organizer: Organizer,
    quarantine: QuarantineSink,
    in_flight: DashSet<PathBuf>,
}

impl Orchestrator {
    pub fn new(config: &Config, scanner: Arc<dyn SecurityScanner>) -> Self {
        Self {
            validator: PathValidator::new(config.allowed_roots()),
            stability: StabilityChecker::new(&config.stability),
            scanner,
            scanner_enabled: config.scanner.enabled,
            fail_closed: config.security.fail_closed,
            expander: ArchiveExpander::new(config.security.archive_limits),
            classifier: ExtensionClassifier,
            organizer: Organizer::new(config.directories.destination.clone()),
            quarantine: QuarantineSink::new(config.directories.quarantine_dir()),
            in_flight: DashSet::new(),
        }
    }

    /// Consume tasks until the channel closes, processing up to `workers`
    /// concurrently, then drain the in-flight ones.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<FileTask>, workers: usize) {
        let semaphore = Arc::new(Semaphore::new(workers));
        while let Some(task) = rx.recv().await {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                this.process(task).await;
            });
        }
        let _ = semaphore.acquire_many(workers as u32).await;
        info!("pipeline drained");
    }

    /// Run one task to its terminal state.
    pub async fn process(&self, task: FileTask) -> ProcessingOutcome {
        if !self.in_flight.insert(task.path.clone()) {
            debug!(path = %task.path.display(), "dropping duplicate event for in-flight file");
            return ProcessingOutcome::Skipped("already in flight".to_string());
        }

        let outcome = self.process_inner(&task.path).await;
        self.in_flight.remove(&task.path);

        match &outcome {
            ProcessingOutcome::Placed(dest) => {
                info!(path = %task.path.display(), dest = %dest.display(), "task complete")
            }
            ProcessingOutcome::Quarantined(dest) => {
                warn!(path = %task.path.display(), dest = %dest.display(), "task quarantined")
            }
            ProcessingOutcome::Skipped(why) => {
                debug!(path = %task.path.display(), %why, "task skipped")
            }
            ProcessingOutcome::Failed(why) => {
                error!(path = %task.path.display(), %why, "task failed")
            }
        }
        outcome
    }

    async fn process_inner(&self, path: &Path) -> ProcessingOutcome {
        let resolved = match self.validator.validate(path) {
            Ok(resolved) => resolved,
            Err(e) => {
                // Symlinks and other validation rejects still exist on disk
                // and must be contained; a file that is simply gone is not.
                if path.symlink_metadata().is_ok() {
                    return self.quarantine_for(path, &e);
                }
                return ProcessingOutcome::Skipped(format!("gone before validation: {e}"));
            }
        };

        match self.stability.observe(&resolved).await {
            Stability::Stable => {}
            Stability::Vanished => {
                return ProcessingOutcome::Skipped("vanished during stability check".to_string());
            }
            Stability::TimedOut => {
                let e = PipelineError::StabilityTimeout {
                    path: resolved.clone(),
                };
                return self.quarantine_for(&resolved, &e);
            }
        }

        if let Gate::Blocked(outcome) = self.scan_gate(&resolved).await {
            return outcome;
        }

        let category = self.classifier.classify(&resolved);
        if category.is_archive() && ArchiveExpander::supports(&resolved) {
            return self.process_archive(&resolved).await;
        }

        match self.organizer.place_in(&resolved, category) {
            Ok(dest) => ProcessingOutcome::Placed(dest),
            Err(e) => self.quarantine_for(&resolved, &e),
        }
    }

    /// Scan one file and decide whether it may continue.
    ///
    /// Infection always blocks. Scanner failure blocks only under the
    /// fail-closed policy; fail-open logs loudly and lets the file pass.
    async fn scan_gate(&self, path: &Path) -> Gate {
        if !self.scanner_enabled {
            warn!(path = %path.display(), "scanning disabled, file passes unscanned");
            return Gate::Pass;
        }

        match self.scanner.scan(path).await {
            ScanResult::Clean => Gate::Pass,
            ScanResult::Infected { threat } => {
                let record = QuarantineRecord::for_threat(path, &threat, "detected by scanner");
                Gate::Blocked(self.quarantine_with(path, record))
            }
            ScanResult::Unavailable(detail) => {
                self.scan_failure(path, PipelineError::ScannerUnavailable(detail))
            }
            ScanResult::Error(detail) => {
                self.scan_failure(path, PipelineError::ScannerError(detail))
            }
        }
    }

    fn scan_failure(&self, path: &Path, e: PipelineError) -> Gate {
        if self.fail_closed {
            Gate::Blocked(self.quarantine_for(path, &e))
        } else {
            warn!(path = %path.display(), error = %e, "scanner failed, passing file (fail-open)");
            Gate::Pass
        }
    }

    /// Expand an archive tree and place its contents.
    ///
    /// Iterative worklist, one shared accumulator, temp workspaces held for
    /// the whole tree. Any expansion failure quarantines the original
    /// container; extracted members evaporate with their workspaces.
    async fn process_archive(&self, container: &Path) -> ProcessingOutcome {
        let mut acc = ArchiveAccumulator::default();
        let mut workspaces: Vec<TempDir> = Vec::new();
        let mut worklist: Vec<(PathBuf, u32)> = vec![(container.to_path_buf(), 0)];

        while let Some((archive, depth)) = worklist.pop() {
            let workspace = match tempfile::tempdir() {
                Ok(dir) => dir,
                Err(e) => return self.quarantine_for(container, &PipelineError::MoveIo(e)),
            };

            let files = match self
                .expander
                .expand(&archive, workspace.path(), &mut acc, depth)
            {
                Ok(files) => files,
                Err(e) => return self.quarantine_for(container, &e),
            };
            workspaces.push(workspace);

            for file in files {
                let resolved = match self.validator.validate(&file) {
                    Ok(resolved) => resolved,
                    Err(e) => return self.quarantine_for(container, &e),
                };

                // Extracted members were fully written by the expander, so
                // they skip the stability stage and go straight to scanning.
                match self.scan_gate(&resolved).await {
                    Gate::Pass => {}
                    Gate::Blocked(ProcessingOutcome::Quarantined(dest)) => {
                        warn!(
                            container = %container.display(),
                            member = %resolved.display(),
                            quarantined_as = %dest.display(),
                            "archive member blocked"
                        );
                        continue;
                    }
                    Gate::Blocked(other) => return other,
                }

                let category = self.classifier.classify(&resolved);
                if category.is_archive() && ArchiveExpander::supports(&resolved) {
                    worklist.push((resolved, depth + 1));
                    continue;
                }

                if let Err(e) = self.organizer.place_in(&resolved, category) {
                    if let ProcessingOutcome::Failed(why) = self.quarantine_for(&resolved, &e) {
                        return ProcessingOutcome::Failed(why);
                    }
                }
            }
        }

        // The container itself is organized only after its whole subtree
        // resolved cleanly.
        match self.organizer.place_in(container, Category::Archives) {
            Ok(dest) => ProcessingOutcome::Placed(dest),
            Err(e) => self.quarantine_for(container, &e),
        }
    }

    fn quarantine_for(&self, file: &Path, e: &PipelineError) -> ProcessingOutcome {
        self.quarantine_with(file, QuarantineRecord::for_error(file, e))
    }

    fn quarantine_with(&self, file: &Path, record: QuarantineRecord) -> ProcessingOutcome {
        match self.quarantine.quarantine(file, &record) {
            Ok(dest) => ProcessingOutcome::Quarantined(dest),
            Err(qe) => ProcessingOutcome::Failed(format!(
                "quarantine failed for {} ({}): {qe}",
                file.display(),
                record.reason_code,
            )),
        }
    }
}
