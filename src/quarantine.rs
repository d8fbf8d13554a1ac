//! Quarantine sink: the single failure destination for every blocked file.
//!
//! A quarantined file is moved (never copied-and-left) into the quarantine
//! directory and a sidecar `<name>.log` record is written next to it, so an
//! operator can see why the file was blocked without any other state.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{error, warn};

use crate::error::PipelineError;
use crate::organize::claim_and_move;

/// Why a file was quarantined, as written into its sidecar record.
#[derive(Debug, Clone)]
pub struct QuarantineRecord {
    /// Path the file arrived under before processing.
    pub original_path: PathBuf,
    /// Stable machine-readable code, e.g. `threat_detected` or
    /// `archive_limit_exceeded(max_files)`.
    pub reason_code: String,
    /// Human-readable detail: threat name, scanner output, error text.
    pub detail: String,
}

impl QuarantineRecord {
    pub fn for_error(original_path: &Path, error: &PipelineError) -> Self {
        Self {
            original_path: original_path.to_path_buf(),
            reason_code: error.reason_code(),
            detail: error.to_string(),
        }
    }

    pub fn for_threat(original_path: &Path, threat: &str, scan_output: &str) -> Self {
        Self {
            original_path: original_path.to_path_buf(),
            reason_code: "threat_detected".to_string(),
            detail: format!("{threat}: {scan_output}"),
        }
    }

    fn render(&self, quarantined_as: &Path) -> String {
        format!(
            "Quarantine Date: {}\nOriginal Path: {}\nQuarantined As: {}\nReason: {}\nDetail: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.original_path.display(),
            quarantined_as.display(),
            self.reason_code,
            self.detail,
        )
    }
}

pub struct QuarantineSink {
    dir: PathBuf,
}

impl QuarantineSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Move `file` into quarantine and write its sidecar record.
    ///
    /// Returns the quarantined path. Failing to write the sidecar is logged
    /// but does not fail the quarantine; the move is what contains the file.
    pub fn quarantine(
        &self,
        file: &Path,
        record: &QuarantineRecord,
    ) -> Result<PathBuf, PipelineError> {
        std::fs::create_dir_all(&self.dir)?;

        let dest = claim_and_move(&self.dir, file)?;

        warn!(
            file = %record.original_path.display(),
            quarantined_as = %dest.display(),
            reason = %record.reason_code,
            "file quarantined"
        );

        let log_path = sidecar_path(&dest);
        if let Err(e) = std::fs::write(&log_path, record.render(&dest)) {
            error!(path = %log_path.display(), error = %e, "failed to write quarantine record");
        }
        Ok(dest)
    }
}

fn sidecar_path(quarantined: &Path) -> PathBuf {
    let name = quarantined
        .file_name()
        .unwrap_or_default()
        .to_string_lossy();
    quarantined.with_file_name(format!("{name}.log"))
}
