//! File stability detection.
//!
//! A file counts as stable once its size and modification time show zero
//! change across a full observation window. Any change resets the window;
//! the whole observation is capped by a hard maximum wait. This is the sole
//! suspension point before scanning begins.

use std::path::Path;
use std::time::SystemTime;

use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::config::StabilityConfig;

/// Terminal outcome of one stability observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// A full window elapsed with no observed change.
    Stable,
    /// The hard wait cap elapsed while the file kept changing.
    TimedOut,
    /// The file disappeared or became unreadable mid-check.
    Vanished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StabilitySample {
    size: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct StabilityChecker {
    duration: Duration,
    interval: Duration,
    max_wait: Duration,
}

impl StabilityChecker {
    pub fn new(config: &StabilityConfig) -> Self {
        Self {
            duration: config.duration(),
            interval: config.interval(),
            max_wait: config.max_wait(),
        }
    }

    /// Observe `path` until it is stable, times out, or vanishes.
    ///
    /// No single await blocks longer than one sampling interval.
    pub async fn observe(&self, path: &Path) -> Stability {
        let mut last = match sample(path).await {
            Some(sample) => sample,
            None => return Stability::Vanished,
        };

        let started = Instant::now();
        let mut window_start = Instant::now();

        loop {
            if window_start.elapsed() >= self.duration {
                debug!(path = %path.display(), "file is stable");
                return Stability::Stable;
            }
            if started.elapsed() >= self.max_wait {
                debug!(path = %path.display(), "stability observation timed out");
                return Stability::TimedOut;
            }

            sleep(self.interval).await;

            match sample(path).await {
                None => return Stability::Vanished,
                Some(current) => {
                    if current != last {
                        debug!(path = %path.display(), "file still being written");
                        last = current;
                        window_start = Instant::now();
                    }
                }
            }
        }
    }
}

async fn sample(path: &Path) -> Option<StabilitySample> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(StabilitySample {
        size: meta.len(),
        modified: meta.modified().ok(),
    })
}
