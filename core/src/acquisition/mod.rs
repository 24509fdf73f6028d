pub mod devices;
pub mod policy;
pub mod signal;
pub mod source;

pub use policy::{RetryPolicy, DEFAULT_BACKOFF};
pub use signal::StopSignal;
pub use source::{AcquisitionSource, SourceState, TraceSource};
