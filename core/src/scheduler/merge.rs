use crate::acquisition::{SourceState, StopSignal, TraceSource};
use crate::loader::ProgressiveLoader;
use crate::prelude::{now_epoch, AcqResult};
use crate::remote::{Command, RemoteEndpoint, Reply};
use crate::store::Store;
use crate::telemetry::{LogManager, SourceStats};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default scheduler period.
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Receives one consolidated notification per tick that changed the store.
pub trait RefreshSink<S> {
    fn refresh(&mut self, store: &S, report: &TickReport);
}

impl<S, F> RefreshSink<S> for F
where
    F: FnMut(&S, &TickReport),
{
    fn refresh(&mut self, store: &S, report: &TickReport) {
        self(store, report)
    }
}

/// What a single tick merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub files_added: usize,
    pub traces_merged: usize,
    /// Traces merged per source, for sources that delivered any.
    pub per_source: Vec<(String, usize)>,
    pub pruned: usize,
    pub commands_served: usize,
    /// Whether the refresh sink was notified.
    pub refreshed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub state: SourceState,
    pub stats: SourceStats,
}

/// Running totals of a scheduler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub ticks: u64,
    pub refreshes: u64,
    pub files_added: u64,
    pub traces_merged: u64,
    pub loader_pending: bool,
    pub sources: Vec<SourceStatus>,
}

/// Periodic merge of all producers into a store, run on the controller
/// thread.
///
/// Each tick advances the file loader once, drains every source in order,
/// serves queued remote commands against the merged store, and notifies the
/// refresh sink once if anything changed. `tick` takes `&mut self`, so ticks never overlap.
pub struct MergeScheduler<S: Store, R: RefreshSink<S>> {
    store: S,
    sink: R,
    period: Duration,
    retention: Option<Duration>,
    loader: Option<ProgressiveLoader>,
    sources: Vec<Box<dyn TraceSource>>,
    remote: Option<RemoteEndpoint>,
    shutdown: Arc<StopSignal>,
    totals: SchedulerStatus,
    logger: LogManager,
}

impl<S: Store, R: RefreshSink<S>> MergeScheduler<S, R> {
    pub fn new(store: S, sink: R) -> Self {
        Self {
            store,
            sink,
            period: DEFAULT_TICK,
            retention: None,
            loader: None,
            sources: Vec::new(),
            remote: None,
            shutdown: Arc::new(StopSignal::new()),
            totals: SchedulerStatus::default(),
            logger: LogManager::new("scheduler"),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Keep only traces newer than `window` before now in the store.
    pub fn with_retention(mut self, window: Duration) -> Self {
        self.retention = Some(window);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Signal that ends `run` when requested, e.g. from a signal handler.
    pub fn shutdown_signal(&self) -> Arc<StopSignal> {
        Arc::clone(&self.shutdown)
    }

    pub fn attach_loader(&mut self, loader: ProgressiveLoader) {
        self.loader = Some(loader);
    }

    pub fn attach_remote(&mut self, endpoint: RemoteEndpoint) {
        self.remote = Some(endpoint);
    }

    /// Starts `source` unless it is already running and schedules it for
    /// draining.
    pub fn add_source(&mut self, mut source: Box<dyn TraceSource>) -> AcqResult<()> {
        if source.state() == SourceState::Created {
            source.start()?;
        }
        self.logger
            .record(&format!("source {} attached", source.name()));
        self.sources.push(source);
        Ok(())
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn loader_pending(&self) -> bool {
        self.loader.is_some()
    }

    /// Nothing left to merge: no loader pending and no sources configured.
    pub fn is_finished(&self) -> bool {
        self.loader.is_none() && self.sources.is_empty()
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            loader_pending: self.loader_pending(),
            sources: self.source_statuses(),
            ..self.totals.clone()
        }
    }

    pub fn source_statuses(&self) -> Vec<SourceStatus> {
        self.sources
            .iter()
            .map(|source| SourceStatus {
                name: source.name().to_string(),
                state: source.state(),
                stats: source.stats(),
            })
            .collect()
    }

    /// Runs one merge pass.
    pub fn tick(&mut self) -> TickReport {
        self.totals.ticks += 1;
        let mut report = TickReport {
            tick: self.totals.ticks,
            ..Default::default()
        };

        self.advance_loader(&mut report);
        self.drain_sources(&mut report);
        self.serve_remote(&mut report);

        if let Some(window) = self.retention {
            report.pruned = self
                .store
                .prune_before(now_epoch() - window.as_secs_f64());
        }

        if report.files_added > 0 || report.traces_merged > 0 {
            report.refreshed = true;
            self.totals.refreshes += 1;
            self.sink.refresh(&self.store, &report);
        }
        report
    }

    /// Ticks every period until nothing is left to merge or shutdown is
    /// requested. Sleeps the remainder of the period after each tick.
    pub fn run(&mut self) {
        self.logger.record(&format!(
            "merging every {} ms",
            self.period.as_millis()
        ));
        while !self.is_finished() && !self.shutdown.is_requested() {
            let begun = Instant::now();
            self.tick();
            if self.is_finished() {
                break;
            }
            let pause = self.period.saturating_sub(begun.elapsed());
            if self.shutdown.wait_timeout(pause) {
                break;
            }
        }
    }

    /// Stops every source, waiting for each capture thread to exit, then
    /// merges what they buffered in a final tick.
    ///
    /// Blocks for as long as the slowest device takes to return.
    pub fn shutdown(&mut self) -> TickReport {
        for source in &mut self.sources {
            self.logger.detail(&format!("stopping {}", source.name()));
            source.stop();
        }
        self.tick()
    }

    fn advance_loader(&mut self, report: &mut TickReport) {
        let Some(loader) = self.loader.as_mut() else {
            return;
        };
        match loader.advance() {
            Some(batch) if !batch.is_empty() => {
                report.files_added = batch.len();
                self.totals.files_added += batch.len() as u64;
                self.store.add_files(batch);
            }
            Some(_) => {}
            None => {
                self.loader = None;
                self.logger.record("file loading complete");
            }
        }
    }

    fn drain_sources(&mut self, report: &mut TickReport) {
        let mut exited = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            // Checked before polling: once stopped, nothing more is appended.
            let stopped = source.state() == SourceState::Stopped;
            let traces = source.poll();
            if !traces.is_empty() {
                report
                    .per_source
                    .push((source.name().to_string(), traces.len()));
                report.traces_merged += traces.len();
                self.totals.traces_merged += traces.len() as u64;
                for trace in traces {
                    self.store.insert_trace(trace);
                }
            }
            if stopped {
                exited.push(index);
            }
        }
        for index in exited.into_iter().rev() {
            let mut source = self.sources.remove(index);
            source.stop();
            self.logger
                .record(&format!("source {} detached", source.name()));
        }
    }

    fn serve_remote(&mut self, report: &mut TickReport) {
        if let Some(remote) = self.remote.take() {
            let served = remote.serve(|command| self.execute(command, report));
            report.commands_served = served;
            self.remote = Some(remote);
        }
    }

    fn execute(&mut self, command: &Command, report: &mut TickReport) -> Reply {
        match command {
            Command::Ping => Reply::Pong,
            Command::ListSources => Reply::Sources {
                sources: self.source_statuses(),
            },
            Command::Status => Reply::Status {
                status: self.status(),
            },
            Command::StopSource { name } => {
                match self.sources.iter().position(|s| s.name() == name) {
                    Some(index) => {
                        let mut source = self.sources.remove(index);
                        source.stop();
                        let traces = source.poll();
                        let final_traces = traces.len();
                        if final_traces > 0 {
                            report.per_source.push((name.clone(), final_traces));
                            report.traces_merged += final_traces;
                            self.totals.traces_merged += final_traces as u64;
                            for trace in traces {
                                self.store.insert_trace(trace);
                            }
                        }
                        self.logger
                            .record(&format!("source {} stopped on request", name));
                        Reply::Stopped {
                            name: name.clone(),
                            final_traces,
                        }
                    }
                    None => Reply::Error {
                        message: format!("no source named {}", name),
                    },
                }
            }
            Command::Shutdown => {
                self.shutdown.request();
                Reply::ShuttingDown
            }
        }
    }
}
