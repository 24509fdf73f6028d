use anyhow::Context;
use bridge::model::{DisplaySink, StatusModel};
use bridge::server::HttpBridge;
use clap::Parser;
use feedcore::acquisition::StopSignal;
use feedcore::remote;
use log::{error, info};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::AcquireConfig;
use workflow::runner::Runner;

mod bridge;
mod discovery;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Merges live trace sources and file discovery into one store")]
struct Args {
    /// Load the acquisition config from YAML; other options are ignored
    #[arg(long)]
    config: Option<PathBuf>,
    /// Live source URI (tcp://, serial://, synthetic://); repeatable
    #[arg(long = "source")]
    sources: Vec<String>,
    /// Files or directories to load in the background
    paths: Vec<PathBuf>,
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,
    /// Seconds to wait before restarting a failed source
    #[arg(long, default_value_t = 5.0)]
    backoff: f64,
    /// Give up on a source after this many failures in a row
    #[arg(long)]
    max_failures: Option<u32>,
    /// Keep only the last SECONDS of live data
    #[arg(long, value_name = "SECONDS")]
    follow: Option<f64>,
    /// Regular expression loaded file names must match
    #[arg(long)]
    pattern: Option<String>,
    #[arg(long, default_value_t = 100)]
    batch_size: usize,
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Serve the HTTP command bridge on this address
    #[arg(long)]
    bind: Option<SocketAddr>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<AcquireConfig> {
        if let Some(path) = self.config {
            return AcquireConfig::load(path);
        }
        let config = AcquireConfig {
            file_pattern: self.pattern,
            batch_size: self.batch_size,
            backoff_secs: self.backoff,
            max_failures: self.max_failures,
            follow_secs: self.follow,
            cache_dir: self.cache_dir,
            bind: self.bind,
            ..AcquireConfig::from_args(self.sources, self.paths, self.tick_ms)
        };
        config.validate().context("validating command line options")?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Args::parse().into_config()?;
    if config.sources.is_empty() && config.paths.is_empty() {
        anyhow::bail!("nothing to acquire: give at least one --source or path");
    }

    let state = Arc::new(RwLock::new(StatusModel::default()));
    let runner = Runner::new(config.clone());
    let mut scheduler = runner.build(DisplaySink::new(Arc::clone(&state), config.follow()))?;

    if let Some(bind) = config.bind {
        let (client, endpoint) = remote::channel();
        scheduler.attach_remote(endpoint);
        HttpBridge::spawn(bind, client, Arc::clone(&state))?;
    }

    watch_interrupt(scheduler.shutdown_signal())?;
    info!(
        "acquiring from {} source(s) and {} path(s)",
        config.sources.len(),
        config.paths.len()
    );

    let summary = runner.execute(&mut scheduler);
    println!(
        "Acquisition finished -> ticks {}, refreshes {}, files {}, traces {} on {} channels",
        summary.ticks, summary.refreshes, summary.files, summary.traces, summary.channels
    );
    Ok(())
}

/// Requests shutdown on the first Ctrl+C.
fn watch_interrupt(shutdown: Arc<StopSignal>) -> anyhow::Result<()> {
    let runtime = TokioBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("creating runtime for signal handling")?;
    thread::Builder::new()
        .name("interrupt".into())
        .spawn(move || {
            match runtime.block_on(signal::ctrl_c()) {
                Ok(()) => {
                    info!("interrupt received, shutting down");
                    shutdown.request();
                }
                Err(err) => error!("awaiting Ctrl+C: {}", err),
            }
        })
        .context("spawning interrupt watcher")?;
    Ok(())
}
