pub mod merge;

pub use merge::{
    MergeScheduler, RefreshSink, SchedulerStatus, SourceStatus, TickReport, DEFAULT_TICK,
};
