use crate::acquisition::policy::RetryPolicy;
use crate::acquisition::signal::StopSignal;
use crate::prelude::{AcqError, AcqResult, Capture, Trace};
use crate::queue::HandoffQueue;
use crate::telemetry::{LogManager, MetricsRecorder, SourceStats};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Lifecycle of an acquisition source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceState {
    Created,
    Running,
    /// Waiting out the backoff after `consecutive` failures in a row.
    Failed { consecutive: u32 },
    Stopping,
    Stopped,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceState::Created => write!(f, "created"),
            SourceState::Running => write!(f, "running"),
            SourceState::Failed { consecutive } => write!(f, "failed ({consecutive}x)"),
            SourceState::Stopping => write!(f, "stopping"),
            SourceState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Object-safe view of a running source, used by the scheduler to hold
/// sources with different capture capabilities side by side.
pub trait TraceSource: Send {
    fn name(&self) -> &str;
    fn start(&mut self) -> AcqResult<()>;
    /// Takes every trace buffered since the previous poll.
    fn poll(&self) -> Vec<Trace>;
    /// Blocks until the capture thread has exited.
    fn stop(&mut self);
    fn state(&self) -> SourceState;
    fn stats(&self) -> SourceStats;
}

struct Shared {
    queue: HandoffQueue<Trace>,
    stop: StopSignal,
    state: Mutex<SourceState>,
    metrics: MetricsRecorder,
}

impl Shared {
    fn state(&self) -> SourceState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Moves to `next` unless a stop has already been announced, in which
    /// case only the final `Stopped` is accepted.
    fn transition(&self, next: SourceState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stopping = matches!(*state, SourceState::Stopping | SourceState::Stopped);
        if !stopping || next == SourceState::Stopped {
            *state = next;
        }
    }
}

/// Generic driver that runs a [`Capture`] capability on its own thread.
///
/// The capability only knows how to talk to its device. This type owns the
/// thread, the handoff queue, the stop request and the retry policy.
///
/// Dropping a running source stops it, which blocks until its thread exits.
pub struct AcquisitionSource<C: Capture> {
    name: String,
    capture: Option<C>,
    policy: RetryPolicy,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    logger: LogManager,
}

impl<C: Capture> AcquisitionSource<C> {
    pub fn new(name: impl Into<String>, capture: C, policy: RetryPolicy) -> Self {
        let name = name.into();
        Self {
            logger: LogManager::new(name.clone()),
            name,
            capture: Some(capture),
            policy,
            shared: Arc::new(Shared {
                queue: HandoffQueue::new(),
                stop: StopSignal::new(),
                state: Mutex::new(SourceState::Created),
                metrics: MetricsRecorder::new(),
            }),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the capture thread. A source can only be started once.
    pub fn start(&mut self) -> AcqResult<()> {
        let capture = self
            .capture
            .take()
            .ok_or_else(|| AcqError::AlreadyStarted(self.name.clone()))?;

        let mut worker = Worker {
            capture,
            policy: self.policy.clone(),
            shared: Arc::clone(&self.shared),
            logger: self.logger.clone(),
            consecutive_failures: 0,
        };
        let handle = thread::Builder::new()
            .name(format!("acq-{}", self.name))
            .spawn(move || worker.run())?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Drains everything captured so far, in capture order.
    pub fn poll(&self) -> Vec<Trace> {
        self.shared.queue.drain()
    }

    /// Requests termination and waits for the capture thread to exit.
    ///
    /// This can take as long as the device needs to return from the capture
    /// call in progress. Traces buffered before the thread exited remain
    /// available to `poll`.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared.transition(SourceState::Stopping);
            self.shared.stop.request();
            if handle.join().is_err() {
                self.logger.error("capture thread panicked");
            }
        }
        self.capture = None;
        self.shared.transition(SourceState::Stopped);
    }

    pub fn state(&self) -> SourceState {
        self.shared.state()
    }

    pub fn stats(&self) -> SourceStats {
        self.shared.metrics.snapshot()
    }
}

impl<C: Capture> TraceSource for AcquisitionSource<C> {
    fn name(&self) -> &str {
        AcquisitionSource::name(self)
    }

    fn start(&mut self) -> AcqResult<()> {
        AcquisitionSource::start(self)
    }

    fn poll(&self) -> Vec<Trace> {
        AcquisitionSource::poll(self)
    }

    fn stop(&mut self) {
        AcquisitionSource::stop(self)
    }

    fn state(&self) -> SourceState {
        AcquisitionSource::state(self)
    }

    fn stats(&self) -> SourceStats {
        AcquisitionSource::stats(self)
    }
}

impl<C: Capture> Drop for AcquisitionSource<C> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

/// Publishes `Stopped` when the capture thread exits, also by unwinding.
struct StoppedOnExit(Arc<Shared>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.transition(SourceState::Stopped);
    }
}

struct Worker<C: Capture> {
    capture: C,
    policy: RetryPolicy,
    shared: Arc<Shared>,
    logger: LogManager,
    consecutive_failures: u32,
}

impl<C: Capture> Worker<C> {
    fn run(&mut self) {
        let _exit = StoppedOnExit(Arc::clone(&self.shared));
        while !self.shared.stop.is_requested() {
            self.shared.metrics.record_start_attempt();
            let outcome = self.session();
            self.capture.acquisition_stop();

            let err = match outcome {
                Ok(()) => break,
                Err(err) => err,
            };
            self.shared.metrics.record_failure();
            self.consecutive_failures += 1;

            if self.shared.stop.is_requested() {
                self.logger
                    .detail(&format!("capture ended while stopping: {}", err));
                break;
            }
            if self.policy.exhausted(self.consecutive_failures) {
                self.logger.error(&format!(
                    "{}; giving up after {} consecutive failures",
                    err, self.consecutive_failures
                ));
                break;
            }

            self.logger.error(&format!(
                "{}; reconnecting in {:.1}s",
                err,
                self.policy.backoff.as_secs_f64()
            ));
            self.shared.transition(SourceState::Failed {
                consecutive: self.consecutive_failures,
            });
            if self.shared.stop.wait_timeout(self.policy.backoff) {
                break;
            }
        }
        self.logger.record("acquisition stopped");
    }

    /// One connection lifetime. `Ok` means a stop was requested.
    fn session(&mut self) -> AcqResult<()> {
        self.capture.acquisition_start()?;
        self.shared.transition(SourceState::Running);
        self.logger.record("acquisition started");

        while !self.shared.stop.is_requested() {
            let begun = Instant::now();
            let traces = self.capture.capture_step()?;
            self.consecutive_failures = 0;
            if !traces.is_empty() {
                self.shared.metrics.record_captured(traces.len());
                self.shared.queue.extend(traces);
            }
            if let Some(pause) = self.policy.pause_after(begun.elapsed()) {
                if self.shared.stop.wait_timeout(pause) {
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Counter {
        next: i32,
    }

    impl Capture for Counter {
        fn acquisition_start(&mut self) -> AcqResult<()> {
            Ok(())
        }

        fn capture_step(&mut self) -> AcqResult<Vec<Trace>> {
            self.next += 1;
            Ok(vec![Trace::new(
                "XX",
                "CNT",
                "",
                "Z",
                self.next as f64,
                1.0,
                vec![self.next],
            )])
        }

        fn acquisition_stop(&mut self) {}
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn new_source_is_created_and_stops_without_thread() {
        let mut source = AcquisitionSource::new("idle", Counter { next: 0 }, RetryPolicy::default());
        assert_eq!(source.state(), SourceState::Created);
        source.stop();
        assert_eq!(source.state(), SourceState::Stopped);
        assert!(source.poll().is_empty());
    }

    #[test]
    fn starting_twice_is_rejected() {
        let policy = RetryPolicy::default().with_throttle(Duration::from_millis(5));
        let mut source = AcquisitionSource::new("twice", Counter { next: 0 }, policy);
        source.start().unwrap();
        assert!(matches!(source.start(), Err(AcqError::AlreadyStarted(_))));
        source.stop();
    }

    struct Exploding;

    impl Capture for Exploding {
        fn acquisition_start(&mut self) -> AcqResult<()> {
            Ok(())
        }

        fn capture_step(&mut self) -> AcqResult<Vec<Trace>> {
            panic!("device driver bug");
        }

        fn acquisition_stop(&mut self) {}
    }

    #[test]
    fn panicking_capture_ends_stopped() {
        let mut source = AcquisitionSource::new("exploding", Exploding, RetryPolicy::default());
        source.start().unwrap();
        wait_for(|| source.state() == SourceState::Stopped);
        source.stop();
        assert_eq!(source.state(), SourceState::Stopped);
    }

    #[test]
    fn polls_preserve_capture_order_across_calls() {
        let policy = RetryPolicy::default().with_throttle(Duration::from_millis(1));
        let mut source = AcquisitionSource::new("order", Counter { next: 0 }, policy);
        source.start().unwrap();

        let mut values = Vec::new();
        wait_for(|| {
            values.extend(source.poll().into_iter().flat_map(|t| t.samples));
            values.len() >= 20
        });
        source.stop();
        values.extend(source.poll().into_iter().flat_map(|t| t.samples));

        let expected: Vec<i32> = (1..=values.len() as i32).collect();
        assert_eq!(values, expected);
        assert_eq!(source.state(), SourceState::Stopped);
        assert!(source.poll().is_empty());
        assert_eq!(source.stats().traces_captured, values.len() as u64);
    }
}
