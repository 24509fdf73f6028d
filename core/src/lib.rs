//! Acquisition and buffering core for real-time trace feeds.
//!
//! Every live source runs its capture loop on a dedicated thread and hands
//! traces to the controller through its own queue. A progressive loader does
//! the same for file discovery. The controller thread runs the merge
//! scheduler, which periodically drains all producers into a store and
//! emits one refresh notification per tick.

pub mod acquisition;
pub mod loader;
pub mod prelude;
pub mod queue;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use acquisition::{AcquisitionSource, RetryPolicy, SourceState, StopSignal, TraceSource};
pub use loader::ProgressiveLoader;
pub use prelude::{AcqError, AcqResult, Capture, FileBatch, FileDescriptor, Trace};
pub use scheduler::{MergeScheduler, RefreshSink, TickReport};
pub use store::{MemoryStore, Store};
