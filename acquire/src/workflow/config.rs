use anyhow::{bail, Context};
use feedcore::acquisition::RetryPolicy;
use feedcore::scheduler::DEFAULT_TICK;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted reconnect backoff.
pub const MAX_BACKOFF_SECS: f64 = 24.0 * 3600.0;
/// Longest accepted follow window.
pub const MAX_FOLLOW_SECS: f64 = 366.0 * 24.0 * 3600.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireConfig {
    /// Live source URIs, see `workflow::sources`.
    pub sources: Vec<String>,
    /// Files or directories scanned in the background.
    pub paths: Vec<PathBuf>,
    /// Regular expression file names must match to be loaded.
    pub file_pattern: Option<String>,
    pub batch_size: usize,
    pub tick_ms: u64,
    pub backoff_secs: f64,
    /// Stop retrying a source after this many failures in a row.
    pub max_failures: Option<u32>,
    /// Keep only the most recent seconds of live data.
    pub follow_secs: Option<f64>,
    pub cache_dir: Option<PathBuf>,
    /// Address of the HTTP command bridge; disabled when unset.
    pub bind: Option<SocketAddr>,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            paths: Vec::new(),
            file_pattern: None,
            batch_size: 100,
            tick_ms: DEFAULT_TICK.as_millis() as u64,
            backoff_secs: 5.0,
            max_failures: None,
            follow_secs: None,
            cache_dir: None,
            bind: None,
        }
    }
}

impl AcquireConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading acquisition config {}", path_ref.display()))?;
        let config: AcquireConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing acquisition config {}", path_ref.display()))?;
        config
            .validate()
            .with_context(|| format!("validating acquisition config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(sources: Vec<String>, paths: Vec<PathBuf>, tick_ms: u64) -> Self {
        Self {
            sources,
            paths,
            tick_ms,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_ms == 0 {
            bail!("tick_ms must be positive");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if !(self.backoff_secs.is_finite()
            && (0.0..=MAX_BACKOFF_SECS).contains(&self.backoff_secs))
        {
            bail!("backoff_secs must be within 0..={}", MAX_BACKOFF_SECS);
        }
        if let Some(follow) = self.follow_secs {
            if !(follow.is_finite() && follow > 0.0 && follow <= MAX_FOLLOW_SECS) {
                bail!("follow_secs must be positive and at most {}", MAX_FOLLOW_SECS);
            }
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn follow(&self) -> Option<Duration> {
        self.follow_secs.map(Duration::from_secs_f64)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_secs_f64(self.backoff_secs),
            throttle: None,
            max_consecutive_failures: self.max_failures,
        }
    }
}
