//! Configuration surface for the pipeline.
//!
//! Loaded once from a TOML file at startup and passed into the orchestrator
//! by value; there is no ambient mutable configuration anywhere in the crate.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub directories: Directories,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub stability: StabilityConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Size of the worker pool processing tasks concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Directories {
    /// Watched directory that new files arrive in.
    pub source: PathBuf,
    /// Root of the organized destination tree.
    pub destination: PathBuf,
    /// Quarantine directory; defaults to `<destination>/quarantine`.
    pub quarantine: Option<PathBuf>,
}

impl Directories {
    pub fn quarantine_dir(&self) -> PathBuf {
        self.quarantine
            .clone()
            .unwrap_or_else(|| self.destination.join("quarantine"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// On scanner failure: quarantine (true) or proceed with a warning (false).
    pub fail_closed: bool,
    pub archive_limits: ArchiveLimits,
    /// Extra roots files may legitimately live under, beyond the source
    /// directory and the system temp directory.
    pub allowed_roots: Vec<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            fail_closed: true,
            archive_limits: ArchiveLimits::default(),
            allowed_roots: Vec::new(),
        }
    }
}

/// Caps shared by every recursive expansion of one top-level archive.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ArchiveLimits {
    pub max_files: u64,
    pub max_total_size: u64,
    pub max_depth: u32,
    pub max_file_size: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_files: 1000,
            max_total_size: 100 * 1024 * 1024,
            max_depth: 10,
            max_file_size: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Span with zero observed changes before a file counts as stable.
    pub duration_seconds: f64,
    /// Sampling interval.
    pub check_interval: f64,
    /// Hard cap on total observation time; exceeding it is a timeout.
    pub max_wait_seconds: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 2.0,
            check_interval: 0.5,
            max_wait_seconds: 30.0,
        }
    }
}

impl StabilityConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs_f64(self.max_wait_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub enabled: bool,
    pub command: String,
    pub timeout_seconds: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "clamscan".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl ScannerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_workers() -> usize {
    4
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directories.source == self.directories.destination {
            return Err(ConfigError::Invalid(
                "source and destination directories must differ".to_string(),
            ));
        }
        let limits = &self.security.archive_limits;
        if limits.max_files == 0 || limits.max_total_size == 0 || limits.max_file_size == 0 {
            return Err(ConfigError::Invalid(
                "archive limits must be non-zero".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid(
                "worker pool size must be at least 1".to_string(),
            ));
        }
        if self.stability.check_interval <= 0.0 || self.stability.duration_seconds < 0.0 {
            return Err(ConfigError::Invalid(
                "stability interval must be positive".to_string(),
            ));
        }
        if self.stability.max_wait_seconds < self.stability.duration_seconds {
            return Err(ConfigError::Invalid(
                "stability max wait must be at least the quiet window; \
                 every file would time out"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Roots a candidate file may resolve under: configured extras, the
    /// watched source, and the system temp directory (extraction workspaces
    /// live there).
    pub fn allowed_roots(&self) -> Vec<PathBuf> {
        let mut roots = self.security.allowed_roots.clone();
        roots.push(self.directories.source.clone());
        roots.push(std::env::temp_dir());
        roots
    }
}
