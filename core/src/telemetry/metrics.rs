use serde::Serialize;
use std::sync::Mutex;

/// Counters kept per source, shared between its thread and the controller.
pub struct MetricsRecorder {
    inner: Mutex<SourceStats>,
}

/// Point-in-time copy of a source's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    /// Calls to `acquisition_start`, successful or not.
    pub start_attempts: u64,
    pub traces_captured: u64,
    pub failures: u64,
    /// Restarts after a failure, i.e. start attempts beyond the first.
    pub restarts: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SourceStats::default()),
        }
    }

    pub fn record_start_attempt(&self) {
        if let Ok(mut stats) = self.inner.lock() {
            if stats.start_attempts > 0 {
                stats.restarts += 1;
            }
            stats.start_attempts += 1;
        }
    }

    pub fn record_captured(&self, count: usize) {
        if let Ok(mut stats) = self.inner.lock() {
            stats.traces_captured += count as u64;
        }
    }

    pub fn record_failure(&self) {
        if let Ok(mut stats) = self.inner.lock() {
            stats.failures += 1;
        }
    }

    pub fn snapshot(&self) -> SourceStats {
        if let Ok(stats) = self.inner.lock() {
            *stats
        } else {
            SourceStats::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
