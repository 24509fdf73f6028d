use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// Network/station/location/channel identity of a trace.
pub type NslcId = (String, String, String, String);

/// Block of sampled waveform data produced by exactly one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub network: String,
    pub station: String,
    #[serde(default)]
    pub location: String,
    pub channel: String,
    /// Start time in seconds since the Unix epoch.
    pub tmin: f64,
    /// Sample interval in seconds.
    pub deltat: f64,
    #[serde(default)]
    pub samples: Vec<i32>,
}

impl Trace {
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: impl Into<String>,
        channel: impl Into<String>,
        tmin: f64,
        deltat: f64,
        samples: Vec<i32>,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            location: location.into(),
            channel: channel.into(),
            tmin,
            deltat,
            samples,
        }
    }

    pub fn nslc_id(&self) -> NslcId {
        (
            self.network.clone(),
            self.station.clone(),
            self.location.clone(),
            self.channel.clone(),
        )
    }

    /// Time of the last sample.
    pub fn tmax(&self) -> f64 {
        match self.samples.len() {
            0 => self.tmin,
            n => self.tmin + (n - 1) as f64 * self.deltat,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A file found by discovery and handed to the store for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileDescriptor {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: Option<SystemTime>) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
        }
    }
}

/// Files produced by one discovery step, in discovery order.
pub type FileBatch = Vec<FileDescriptor>;

/// Error type shared by sources, capabilities and constructors.
#[derive(thiserror::Error, Debug)]
pub enum AcqError {
    #[error("connectivity failure: {0}")]
    Connectivity(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("source {0} already started")]
    AlreadyStarted(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for AcqError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::InvalidInput => AcqError::Configuration(err.to_string()),
            _ => AcqError::Connectivity(err.to_string()),
        }
    }
}

pub type AcqResult<T> = Result<T, AcqError>;

/// Device-specific capture behaviour plugged into a generic
/// [`AcquisitionSource`](crate::acquisition::AcquisitionSource).
///
/// Implementations only talk to their device; threading, buffering, stop
/// handling and retries live in the driver.
pub trait Capture: Send + 'static {
    /// Connect or open the device. Called again after every failure.
    fn acquisition_start(&mut self) -> AcqResult<()>;

    /// Capture one unit of data. May return no traces (e.g. a read timeout).
    fn capture_step(&mut self) -> AcqResult<Vec<Trace>>;

    /// Tear down the connection. Must tolerate being called when
    /// `acquisition_start` failed half way.
    fn acquisition_stop(&mut self);
}

/// Seconds since the Unix epoch as used for trace timestamps.
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
