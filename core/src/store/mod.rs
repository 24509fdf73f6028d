pub mod memory;

use crate::prelude::{FileBatch, Trace};

pub use memory::MemoryStore;

/// Central repository that merged output is written into.
///
/// Only the controller thread calls these, through `&mut self`; an
/// implementation shared with other writers must bring its own locking.
/// Both calls should return quickly compared to a scheduler tick.
pub trait Store {
    fn add_files(&mut self, batch: FileBatch);
    fn insert_trace(&mut self, trace: Trace);

    /// Forgets traces ending before `tmin`, returning how many were dropped.
    /// Stores without retention keep everything.
    fn prune_before(&mut self, _tmin: f64) -> usize {
        0
    }
}
