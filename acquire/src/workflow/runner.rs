use crate::bridge::model::DisplaySink;
use crate::discovery::scan::discover;
use crate::workflow::config::AcquireConfig;
use crate::workflow::sources::build_source;
use anyhow::Context;
use feedcore::loader::ProgressiveLoader;
use feedcore::scheduler::MergeScheduler;
use feedcore::store::MemoryStore;
use regex::Regex;
use serde::Serialize;

pub type Scheduler = MergeScheduler<MemoryStore, DisplaySink>;

/// Totals reported once a run is over.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub refreshes: u64,
    pub files: usize,
    pub traces: usize,
    pub channels: usize,
}

#[derive(Clone)]
pub struct Runner {
    config: AcquireConfig,
}

impl Runner {
    pub fn new(config: AcquireConfig) -> Self {
        Self { config }
    }

    /// Builds the scheduler with every configured source started and the
    /// file loader attached. Any bad source URI fails the whole build.
    pub fn build(&self, sink: DisplaySink) -> anyhow::Result<Scheduler> {
        let store = MemoryStore::new(self.config.cache_dir.clone());
        let mut scheduler = MergeScheduler::new(store, sink).with_period(self.config.tick());
        if let Some(window) = self.config.follow() {
            scheduler = scheduler.with_retention(window);
        }

        let policy = self.config.retry_policy();
        let mut sources = Vec::with_capacity(self.config.sources.len());
        for uri in &self.config.sources {
            sources.push(build_source(uri, &policy)?);
        }
        for source in sources {
            let name = source.name().to_string();
            scheduler
                .add_source(source)
                .with_context(|| format!("starting source {}", name))?;
        }

        if !self.config.paths.is_empty() {
            let pattern = self
                .config
                .file_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .context("compiling file pattern")?;
            let batches = discover(self.config.paths.clone(), self.config.batch_size, pattern);
            let loader =
                ProgressiveLoader::spawn("files", batches).context("starting file loader")?;
            scheduler.attach_loader(loader);
        }
        Ok(scheduler)
    }

    /// Runs until there is nothing left to merge or shutdown is requested,
    /// then stops every source and merges what remained.
    pub fn execute(&self, scheduler: &mut Scheduler) -> RunSummary {
        scheduler.run();
        scheduler.shutdown();
        let status = scheduler.status();
        let store = scheduler.store();
        RunSummary {
            ticks: status.ticks,
            refreshes: status.refreshes,
            files: store.file_count(),
            traces: store.trace_count(),
            channels: store.nslc_ids().count(),
        }
    }
}
