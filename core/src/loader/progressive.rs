use crate::prelude::{AcqResult, FileBatch};
use crate::queue::HandoffQueue;
use crate::telemetry::LogManager;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct Shared {
    queue: HandoffQueue<FileBatch>,
    done: AtomicBool,
}

/// Marks discovery finished when the thread exits, also by unwinding.
struct FinishOnExit(Arc<Shared>);

impl Drop for FinishOnExit {
    fn drop(&mut self) {
        self.0.done.store(true, Ordering::Release);
    }
}

/// Runs a finite file discovery sequence on its own thread and hands the
/// batches out incrementally.
///
/// Iterating yields the discovered batches one per step, or an empty batch
/// when discovery is still running and nothing new has arrived. Iteration
/// ends once discovery has finished and everything was handed out.
pub struct ProgressiveLoader {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    backlog: VecDeque<FileBatch>,
    logger: LogManager,
}

impl ProgressiveLoader {
    pub fn spawn<I>(name: &str, batches: I) -> AcqResult<Self>
    where
        I: IntoIterator<Item = FileBatch>,
        I::IntoIter: Send + 'static,
    {
        let shared = Arc::new(Shared {
            queue: HandoffQueue::new(),
            done: AtomicBool::new(false),
        });
        let logger = LogManager::new(name);

        let batches = batches.into_iter();
        let handle = {
            let shared = Arc::clone(&shared);
            let logger = logger.clone();
            thread::Builder::new()
                .name(format!("load-{}", name))
                .spawn(move || {
                    let finish = FinishOnExit(Arc::clone(&shared));
                    let mut count = 0usize;
                    for batch in batches {
                        count += batch.len();
                        shared.queue.append(batch);
                    }
                    drop(finish);
                    logger.detail(&format!("discovery finished, {} files", count));
                })?
        };

        Ok(Self {
            shared,
            handle: Some(handle),
            backlog: VecDeque::new(),
            logger,
        })
    }

    /// Takes every batch discovered since the last poll, in order.
    /// Bypasses the iteration backlog, so use either this or `advance`.
    pub fn poll(&self) -> Vec<FileBatch> {
        self.shared.queue.drain()
    }

    /// True once the wrapped sequence is exhausted. Never goes back to false.
    pub fn done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    /// One step of the iteration protocol: `None` when finished, otherwise
    /// the next discovered batch, or an empty one if none is ready yet.
    pub fn advance(&mut self) -> Option<FileBatch> {
        if let Some(batch) = self.backlog.pop_front() {
            return Some(batch);
        }
        // Read the flag first: a batch appended before completion is then
        // guaranteed to show up in this poll or a later one.
        let finished = self.done();
        self.backlog.extend(self.shared.queue.drain());
        match self.backlog.pop_front() {
            Some(batch) => Some(batch),
            None if finished => {
                self.join();
                None
            }
            None => Some(FileBatch::new()),
        }
    }

    /// Waits for the discovery thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                self.logger.error("discovery thread panicked");
            }
        }
    }
}

impl Iterator for ProgressiveLoader {
    type Item = FileBatch;

    fn next(&mut self) -> Option<FileBatch> {
        self.advance()
    }
}

impl Drop for ProgressiveLoader {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::FileDescriptor;
    use std::sync::mpsc;
    use std::time::Duration;

    fn batch(names: &[&str]) -> FileBatch {
        names
            .iter()
            .map(|name| FileDescriptor::new(*name, 0, None))
            .collect()
    }

    #[test]
    fn yields_every_non_empty_batch_then_ends() {
        let batches = vec![batch(&["a", "b"]), batch(&["c"]), batch(&["d"])];
        let loader = ProgressiveLoader::spawn("test", batches).unwrap();

        let mut non_empty = 0;
        let mut paths = Vec::new();
        for step in loader {
            if !step.is_empty() {
                non_empty += 1;
            }
            paths.extend(step.into_iter().map(|f| f.path));
        }
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        assert_eq!(non_empty, 3);
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn done_only_after_sequence_is_exhausted() {
        let (tx, rx) = mpsc::channel::<FileBatch>();
        let mut loader = ProgressiveLoader::spawn("gated", rx.into_iter()).unwrap();

        tx.send(batch(&["first"])).unwrap();
        let mut first = Vec::new();
        while first.is_empty() {
            first = loader.advance().unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!loader.done());
        assert_eq!(loader.advance(), Some(Vec::new()));

        drop(tx);
        let mut rest = Vec::new();
        while let Some(step) = loader.advance() {
            rest.extend(step);
        }
        assert!(loader.done());
        assert!(rest.is_empty());
    }

    #[test]
    fn failing_discovery_still_finishes() {
        let batches = (0..3).map(|i| {
            if i == 1 {
                panic!("directory vanished");
            }
            batch(&["only"])
        });
        let loader = ProgressiveLoader::spawn("broken", batches).unwrap();

        let mut files = Vec::new();
        let mut steps = 0;
        for step in loader {
            files.extend(step);
            steps += 1;
            assert!(steps < 1_000_000, "loader never finished");
            thread::yield_now();
        }
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn empty_sequence_finishes_without_batches() {
        let mut loader = ProgressiveLoader::spawn("empty", Vec::<FileBatch>::new()).unwrap();
        let mut steps = 0;
        while let Some(step) = loader.advance() {
            assert!(step.is_empty());
            steps += 1;
            assert!(steps < 100_000, "loader never finished");
            thread::yield_now();
        }
        assert!(loader.done());
    }
}
