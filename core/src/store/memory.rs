use crate::prelude::{FileBatch, FileDescriptor, NslcId, Trace};
use crate::store::Store;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// In-memory store indexing live traces per channel and discovered files
/// per path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cache_dir: Option<PathBuf>,
    files: Vec<FileDescriptor>,
    file_index: HashMap<PathBuf, usize>,
    traces: BTreeMap<NslcId, Vec<Trace>>,
}

impl MemoryStore {
    /// `cache_dir` is where derived data may be kept; it is never looked up
    /// from the environment.
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self {
            cache_dir,
            ..Default::default()
        }
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn trace_count(&self) -> usize {
        self.traces.values().map(Vec::len).sum()
    }

    pub fn nslc_ids(&self) -> impl Iterator<Item = &NslcId> {
        self.traces.keys()
    }

    /// Traces of one channel in insertion order.
    pub fn traces(&self, nslc: &NslcId) -> &[Trace] {
        self.traces.get(nslc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Earliest start and latest end over all traces.
    pub fn time_span(&self) -> Option<(f64, f64)> {
        self.traces
            .values()
            .flatten()
            .fold(None, |span, trace| match span {
                None => Some((trace.tmin, trace.tmax())),
                Some((tmin, tmax)) => Some((tmin.min(trace.tmin), tmax.max(trace.tmax()))),
            })
    }
}

impl Store for MemoryStore {
    /// Files already known by path are updated in place.
    fn add_files(&mut self, batch: FileBatch) {
        for file in batch {
            match self.file_index.get(&file.path) {
                Some(&index) => self.files[index] = file,
                None => {
                    self.file_index.insert(file.path.clone(), self.files.len());
                    self.files.push(file);
                }
            }
        }
    }

    fn insert_trace(&mut self, trace: Trace) {
        self.traces.entry(trace.nslc_id()).or_default().push(trace);
    }

    fn prune_before(&mut self, tmin: f64) -> usize {
        let mut removed = 0;
        for traces in self.traces.values_mut() {
            let before = traces.len();
            traces.retain(|trace| trace.tmax() >= tmin);
            removed += before - traces.len();
        }
        self.traces.retain(|_, traces| !traces.is_empty());
        removed
    }
}
