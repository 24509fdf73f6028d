use log::{debug, error, info};

/// Prefixes every record with the name of the component that emitted it.
#[derive(Debug, Clone)]
pub struct LogManager {
    origin: String,
}

impl LogManager {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    pub fn record(&self, message: &str) {
        info!("[{}] {}", self.origin, message);
    }

    pub fn detail(&self, message: &str) {
        debug!("[{}] {}", self.origin, message);
    }

    pub fn error(&self, message: &str) {
        error!("[{}] {}", self.origin, message);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new("feedcore")
    }
}
