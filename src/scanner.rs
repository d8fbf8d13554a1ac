//! External antivirus scanning behind a capability trait.
//!
//! The orchestrator depends only on [`ScanResult`]; the real subprocess
//! adapter and the deterministic [`StaticScanner`] double are
//! interchangeable. A scan timeout and a non-infection non-zero exit are
//! both reported as scanner failures and routed by the `fail_closed`
//! policy, never distinguished further.

use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::config::ScannerConfig;

/// Outcome of scanning one file; produced once per pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    Clean,
    Infected { threat: String },
    /// The scanner could not run or its output was unparseable.
    Unavailable(String),
    /// The scanner ran but failed (timeout, signal, unexpected exit code).
    Error(String),
}

#[async_trait]
pub trait SecurityScanner: Send + Sync {
    async fn scan(&self, path: &Path) -> ScanResult;
}

/// Subprocess adapter for `clamscan`.
pub struct ClamAvScanner {
    command: String,
    timeout: Duration,
}

impl ClamAvScanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl SecurityScanner for ClamAvScanner {
    async fn scan(&self, path: &Path) -> ScanResult {
        debug!(path = %path.display(), command = %self.command, "scanning file");

        let run = Command::new(&self.command)
            .arg("--no-summary")
            .arg(path)
            .output();

        match timeout(self.timeout, run).await {
            Err(_) => ScanResult::Error("scan timed out".to_string()),
            Ok(Err(e)) => {
                warn!(command = %self.command, error = %e, "scanner failed to start");
                ScanResult::Unavailable(format!("failed to run {}: {}", self.command, e))
            }
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                parse_clamscan(output.status.code(), &text)
            }
        }
    }
}

/// clamscan exits 0 for clean files and 1 for infected files; anything else
/// is a scanner-side failure.
fn parse_clamscan(code: Option<i32>, output: &str) -> ScanResult {
    static THREAT: Lazy<Regex> = Lazy::new(|| Regex::new(r": (.+) FOUND").unwrap());

    match code {
        Some(0) => ScanResult::Clean,
        Some(1) => {
            let threat = THREAT
                .captures(output)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "Unknown threat".to_string());
            ScanResult::Infected { threat }
        }
        Some(code) => ScanResult::Error(format!("scanner exited with code {code}")),
        None => ScanResult::Error("scanner terminated by signal".to_string()),
    }
}

/// Deterministic scanner double returning a fixed result.
#[derive(Debug, Clone)]
pub struct StaticScanner {
    result: ScanResult,
}

impl StaticScanner {
    pub fn clean() -> Self {
        Self {
            result: ScanResult::Clean,
        }
    }

    pub fn infected(threat: &str) -> Self {
        Self {
            result: ScanResult::Infected {
                threat: threat.to_string(),
            },
        }
    }

    pub fn unavailable() -> Self {
        Self {
            result: ScanResult::Unavailable("scanner not installed".to_string()),
        }
    }
}

#[async_trait]
impl SecurityScanner for StaticScanner {
    async fn scan(&self, _path: &Path) -> ScanResult {
        self.result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_exit_parses_clean() {
        assert_eq!(
            parse_clamscan(Some(0), "/tmp/note.txt: OK\n"),
            ScanResult::Clean
        );
    }

    #[test]
    fn infected_exit_extracts_threat_name() {
        let result = parse_clamscan(Some(1), "/tmp/evil.exe: Eicar-Test-Signature FOUND\n");
        assert_eq!(
            result,
            ScanResult::Infected {
                threat: "Eicar-Test-Signature".to_string()
            }
        );
    }

    #[test]
    fn infected_exit_without_match_reports_unknown_threat() {
        let result = parse_clamscan(Some(1), "garbled output");
        assert_eq!(
            result,
            ScanResult::Infected {
                threat: "Unknown threat".to_string()
            }
        );
    }

    #[test]
    fn other_exit_codes_are_scanner_errors() {
        assert!(matches!(
            parse_clamscan(Some(2), "LibClamAV Error: ..."),
            ScanResult::Error(_)
        ));
        assert!(matches!(parse_clamscan(None, ""), ScanResult::Error(_)));
    }

    #[tokio::test]
    async fn missing_binary_reports_unavailable() {
        let scanner = ClamAvScanner::new(&ScannerConfig {
            enabled: true,
            command: "definitely-not-a-real-scanner-binary".to_string(),
            timeout_seconds: 5,
        });
        let result = scanner.scan(Path::new("/tmp/whatever")).await;
        assert!(matches!(result, ScanResult::Unavailable(_)));
    }
}
