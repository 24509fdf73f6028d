//! Capture capabilities for concrete kinds of hardware and streams.

pub mod network;
pub mod serial;
pub mod synthetic;

pub use network::{NetworkCapture, StreamSelector};
pub use serial::{LineAssembler, SerialCapture, SerialConfig};
pub use synthetic::{SyntheticCapture, SyntheticConfig};
