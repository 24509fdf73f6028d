use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One-shot cooperative stop request that sleepers can wait on.
///
/// Once requested it stays requested.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: Mutex<bool>,
    wakeup: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let mut requested = self
            .requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *requested = true;
        self.wakeup.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *self
            .requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sleeps for `timeout` unless a stop is requested first.
    /// Returns whether a stop was requested.
    ///
    /// A timeout too large to express as a deadline waits for the request.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut requested = self
            .requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*requested {
            requested = match deadline {
                None => self
                    .wakeup
                    .wait(requested)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    match self.wakeup.wait_timeout(requested, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
            };
        }
        *requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unbounded_wait_ends_on_request() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_timeout(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        signal.request();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_runs_full_timeout_without_request() {
        let signal = StopSignal::new();
        let begun = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(begun.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn request_wakes_a_waiter_early() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let begun = Instant::now();
                let stopped = signal.wait_timeout(Duration::from_secs(10));
                (stopped, begun.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        signal.request();
        let (stopped, waited) = waiter.join().unwrap();
        assert!(stopped);
        assert!(waited < Duration::from_secs(5));
        assert!(signal.is_requested());
    }
}
