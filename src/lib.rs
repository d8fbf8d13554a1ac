//! Secure intake pipeline for downloaded files.
//!
//! Watches a source directory and runs every new file through validation,
//! stability detection, antivirus scanning, archive expansion with bomb
//! protection, and classification, placing cleared files into an organized
//! destination tree. Anything that fails a gate is moved to quarantine with
//! a sidecar record explaining why.

pub mod archive;
pub mod classify;
pub mod config;
pub mod error;
pub mod organize;
pub mod pipeline;
pub mod quarantine;
pub mod scanner;
pub mod security;
pub mod stability;
pub mod watcher;

pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{FileTask, Orchestrator, ProcessingOutcome};
