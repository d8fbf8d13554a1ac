//! Error taxonomy for the processing pipeline.
//!
//! Every variant that can block a file maps to a stable reason code which is
//! written into the quarantine record for that file. No variant here is ever
//! allowed to terminate a worker; process-fatal errors are reserved for
//! configuration loading in `main`.

use std::path::PathBuf;
use thiserror::Error;

/// Which archive limit was exceeded during expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveLimit {
    MaxFiles,
    MaxTotalSize,
    MaxDepth,
    MaxFileSize,
}

impl ArchiveLimit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveLimit::MaxFiles => "max_files",
            ArchiveLimit::MaxTotalSize => "max_total_size",
            ArchiveLimit::MaxDepth => "max_depth",
            ArchiveLimit::MaxFileSize => "max_file_size",
        }
    }
}

impl std::fmt::Display for ArchiveLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures a file can hit on its way through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("path traversal detected: {0}")]
    PathTraversal(String),

    #[error("file never stabilized: {}", path.display())]
    StabilityTimeout { path: PathBuf },

    #[error("security scanner unavailable: {0}")]
    ScannerUnavailable(String),

    #[error("security scanner error: {0}")]
    ScannerError(String),

    #[error("archive limit exceeded: {0}")]
    ArchiveLimitExceeded(ArchiveLimit),

    #[error("archive unreadable: {0}")]
    ArchiveCorrupt(String),

    #[error("move failed: {0}")]
    MoveIo(#[from] std::io::Error),
}

impl PipelineError {
    /// Stable reason code recorded alongside quarantined files.
    pub fn reason_code(&self) -> String {
        match self {
            PipelineError::PathTraversal(_) => "path_traversal".to_string(),
            PipelineError::StabilityTimeout { .. } => "stability_timeout".to_string(),
            PipelineError::ScannerUnavailable(_) => "scanner_unavailable".to_string(),
            PipelineError::ScannerError(_) => "scanner_error".to_string(),
            PipelineError::ArchiveLimitExceeded(limit) => {
                format!("archive_limit_exceeded({})", limit.as_str())
            }
            PipelineError::ArchiveCorrupt(_) => "archive_corrupt".to_string(),
            PipelineError::MoveIo(_) => "move_io_error".to_string(),
        }
    }
}
