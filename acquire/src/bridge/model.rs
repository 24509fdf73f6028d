use feedcore::prelude::now_epoch;
use feedcore::scheduler::{RefreshSink, TickReport};
use feedcore::store::MemoryStore;
use log::info;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Snapshot of the store served to display clients.
#[derive(Debug, Clone, Serialize, Default)]
pub struct StatusModel {
    pub refreshes: u64,
    pub traces: usize,
    pub files: usize,
    pub channels: usize,
    pub time_span: Option<(f64, f64)>,
    /// Time window a following display should show.
    pub window: Option<(f64, f64)>,
    pub last_tick: Option<TickReport>,
}

/// Refresh sink that publishes the store state for the HTTP bridge.
pub struct DisplaySink {
    state: Arc<RwLock<StatusModel>>,
    follow: Option<Duration>,
}

impl DisplaySink {
    pub fn new(state: Arc<RwLock<StatusModel>>, follow: Option<Duration>) -> Self {
        Self { state, follow }
    }
}

impl RefreshSink<MemoryStore> for DisplaySink {
    fn refresh(&mut self, store: &MemoryStore, report: &TickReport) {
        let window = self.follow.map(|length| {
            let now = now_epoch();
            (now - length.as_secs_f64(), now)
        });

        let mut guard = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.refreshes += 1;
        guard.traces = store.trace_count();
        guard.files = store.file_count();
        guard.channels = store.nslc_ids().count();
        guard.time_span = store.time_span();
        guard.window = window;
        guard.last_tick = Some(report.clone());

        info!(
            "[display] tick {}: +{} files, +{} traces ({} traces on {} channels)",
            report.tick, report.files_added, report.traces_merged, guard.traces, guard.channels
        );
    }
}
