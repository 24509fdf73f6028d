use feedcore::prelude::{FileBatch, FileDescriptor};
use log::warn;
use regex::Regex;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Lazily walks `paths` and yields the regular files found, `batch_size` at
/// a time. Directories are visited depth first with entries sorted by name;
/// unreadable entries are logged and skipped.
pub fn discover(
    paths: Vec<PathBuf>,
    batch_size: usize,
    pattern: Option<Regex>,
) -> impl Iterator<Item = FileBatch> + Send + 'static {
    let files = paths
        .into_iter()
        .flat_map(|root| WalkDir::new(root).sort_by_file_name().into_iter())
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("skipping unreadable path: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(move |entry| {
            pattern
                .as_ref()
                .map_or(true, |re| re.is_match(&entry.file_name().to_string_lossy()))
        })
        .map(|entry| {
            let (size, modified) = match entry.metadata() {
                Ok(meta) => (meta.len(), meta.modified().ok()),
                Err(_) => (0, None),
            };
            FileDescriptor::new(entry.into_path(), size, modified)
        });

    Batches {
        inner: files,
        size: batch_size.max(1),
    }
}

struct Batches<I> {
    inner: I,
    size: usize,
}

impl<I: Iterator<Item = FileDescriptor>> Iterator for Batches<I> {
    type Item = FileBatch;

    fn next(&mut self) -> Option<FileBatch> {
        let batch: FileBatch = self.inner.by_ref().take(self.size).collect();
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discover_batches_files_in_name_order() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        for name in ["b.mseed", "a.mseed", "sub/c.mseed", "notes.txt"] {
            fs::write(dir.path().join(name), b"data").unwrap();
        }

        let pattern = Regex::new(r"\.mseed$").unwrap();
        let batches: Vec<FileBatch> =
            discover(vec![dir.path().to_path_buf()], 2, Some(pattern)).collect();

        assert_eq!(batches.len(), 2);
        let names: Vec<String> = batches
            .iter()
            .flatten()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mseed", "b.mseed", "c.mseed"]);
        assert_eq!(batches[0][0].size, 4);
    }

    #[test]
    fn missing_paths_yield_nothing() {
        let batches: Vec<FileBatch> =
            discover(vec![PathBuf::from("/definitely/not/here")], 10, None).collect();
        assert!(batches.is_empty());
    }
}
