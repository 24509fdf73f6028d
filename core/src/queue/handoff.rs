use std::mem;
use std::sync::{Mutex, MutexGuard};

/// FIFO handoff between one producer thread and the controller.
///
/// `append` pushes under the lock; `drain` swaps the whole buffer out under
/// the lock. Items appended while or after a drain runs land in the fresh
/// buffer, so every item is observed by exactly one drain.
pub struct HandoffQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn append(&self, item: T) {
        self.lock().push(item);
    }

    /// Appends a group of items in order under a single lock.
    pub fn extend<I: IntoIterator<Item = T>>(&self, items: I) {
        self.lock().extend(items);
    }

    /// Takes everything buffered so far, leaving the queue empty.
    pub fn drain(&self) -> Vec<T> {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the Vec half-updated.
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn drain_returns_items_in_append_order_and_empties() {
        let queue = HandoffQueue::new();
        queue.append(1);
        queue.extend([2, 3]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec![1, 2, 3]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn concurrent_drains_see_every_item_exactly_once() {
        let queue = Arc::new(HandoffQueue::new());
        let total = 20_000u32;

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..total {
                    queue.append(i);
                    if i % 97 == 0 {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut seen = Vec::new();
        while !producer.is_finished() {
            seen.extend(queue.drain());
        }
        producer.join().unwrap();
        seen.extend(queue.drain());

        assert_eq!(seen, (0..total).collect::<Vec<_>>());
    }
}
