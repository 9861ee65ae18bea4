//! Parallel region flusher: a bounded worker pool drains a batch map into
//! per-region writers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};

use super::batch::BatchMap;
use super::{SplitError, SplitResult};
use crate::config::SplitConfig;
use crate::fs::SplitFs;
use crate::wal::{EditsWriter, EntryKey, RegionKey, WalEntry, WalError, WalResult};

const QUIESCE_POLL: Duration = Duration::from_secs(5);
const QUIESCE_POLLS_BEFORE_INFO: u32 = 30;

/// Per-region writers shared across all batches of one split run.
///
/// Insertion is serialized by the table mutex; each writer has its own lock,
/// which is never contended because a batch holds at most one task per
/// region and batches do not overlap.
pub struct WriterTable {
    inner: Mutex<BTreeMap<RegionKey, Arc<Mutex<EditsWriter>>>>,
}

impl WriterTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Look up the writer for `key`'s region, creating it on first use.
    fn get_or_create(
        &self,
        fs: &dyn SplitFs,
        root_dir: &Path,
        key: &EntryKey,
    ) -> WalResult<Arc<Mutex<EditsWriter>>> {
        let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = table.get(&key.region) {
            return Ok(Arc::clone(writer));
        }
        let writer = EditsWriter::create(fs, root_dir, key)?;
        tracing::debug!(
            path = %writer.path().display(),
            region = %key.region,
            "created recovered-edits writer"
        );
        let writer = Arc::new(Mutex::new(writer));
        table.insert(key.region.clone(), Arc::clone(&writer));
        Ok(writer)
    }

    /// Close every writer, in region order, on every exit path of a split
    /// run. Returns the recovered-edits paths and the first close failure.
    pub fn close_all(self) -> (Vec<PathBuf>, Option<(PathBuf, WalError)>) {
        let table = self
            .inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let mut paths = Vec::with_capacity(table.len());
        let mut first_err = None;
        for writer in table.into_values() {
            let writer = match Arc::try_unwrap(writer) {
                Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
                // Unreachable once the pool has quiesced; skip rather than block.
                Err(still_shared) => {
                    let path = still_shared
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .path()
                        .to_path_buf();
                    tracing::warn!(
                        path = %path.display(),
                        "recovered-edits writer still referenced at close, leaking"
                    );
                    paths.push(path);
                    continue;
                }
            };
            let path = writer.path().to_path_buf();
            match writer.close() {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "closed recovered-edits writer");
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "failed closing recovered-edits writer"
                    );
                    if first_err.is_none() {
                        first_err = Some((path.clone(), err));
                    }
                }
            }
            paths.push(path);
        }
        (paths, first_err)
    }
}

impl Default for WriterTable {
    fn default() -> Self {
        Self::new()
    }
}

struct RegionTask {
    region: RegionKey,
    entries: Vec<WalEntry>,
}

/// Drain `batch` into per-region writers using a pool of
/// `config.writer_threads` workers, then quiesce the pool.
///
/// The caller sees the first task failure as an error; writer failures are
/// never skippable. A result channel that disconnects before every task has
/// reported means a worker died mid-task, the pool-interruption case:
/// possible data loss, fatal unless `skip_writer_errors`.
pub fn flush_batch(
    fs: &dyn SplitFs,
    root_dir: &Path,
    batch: BatchMap,
    writers: &WriterTable,
    config: &SplitConfig,
) -> SplitResult<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let region_count = batch.len();
    let worker_count = config.writer_threads.min(region_count);
    let (task_tx, task_rx) = channel::unbounded::<RegionTask>();
    let (result_tx, result_rx) = channel::unbounded::<(RegionKey, WalResult<()>)>();
    for (region, entries) in batch {
        if task_tx.send(RegionTask { region, entries }).is_err() {
            break;
        }
    }
    drop(task_tx);

    let mut results = thread::scope(|scope| -> SplitResult<Vec<(RegionKey, WalResult<()>)>> {
        let mut handles = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("split-writer-{i}"))
                .spawn_scoped(scope, move || {
                    while let Ok(task) = task_rx.recv() {
                        let RegionTask { region, entries } = task;
                        let result = run_region_task(fs, root_dir, writers, &region, &entries);
                        if result_tx.send((region, result)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|source| SplitError::Io { path: None, source })?;
            handles.push(handle);
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(region_count);
        let mut polls = 0u32;
        while results.len() < region_count {
            match result_rx.recv_timeout(QUIESCE_POLL) {
                Ok(result) => results.push(result),
                Err(RecvTimeoutError::Timeout) => {
                    polls += 1;
                    let elapsed_secs = u64::from(polls) * QUIESCE_POLL.as_secs();
                    if polls < QUIESCE_POLLS_BEFORE_INFO {
                        tracing::debug!(elapsed_secs, "waiting for log writers to terminate");
                    } else {
                        tracing::info!(elapsed_secs, "waiting for log writers to terminate");
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let pending = region_count - results.len();
                    tracing::warn!(pending, "log writers were interrupted, possible data loss");
                    for handle in handles {
                        let _ = handle.join();
                    }
                    if config.skip_writer_errors {
                        return Ok(results);
                    }
                    return Err(SplitError::Interrupted { pending });
                }
            }
        }
        for handle in handles {
            let _ = handle.join();
        }
        Ok(results)
    })?;

    results.sort_by(|a, b| a.0.cmp(&b.0));
    for (region, result) in results {
        if let Err(source) = result {
            return Err(SplitError::Writer { region, source });
        }
    }
    Ok(())
}

fn run_region_task(
    fs: &dyn SplitFs,
    root_dir: &Path,
    writers: &WriterTable,
    region: &RegionKey,
    entries: &[WalEntry],
) -> WalResult<()> {
    let Some(first) = entries.first() else {
        return Ok(());
    };
    tracing::debug!(region = %region, edits = entries.len(), "region writer task starting");
    let started = Instant::now();

    let writer = writers.get_or_create(fs, root_dir, &first.key)?;
    let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
    for entry in entries {
        writer.append(entry)?;
    }

    tracing::debug!(
        region = %region,
        edits = entries.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "applied edits to region"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{LocalFs, LogFile};
    use crate::wal::LogReader;
    use std::fs;
    use tempfile::TempDir;

    fn entry(region: &[u8], seq: u64) -> WalEntry {
        WalEntry::new(&b"orders"[..], region.to_vec(), seq, format!("edit-{seq}"))
    }

    fn read_back(root: &Path, key: &EntryKey) -> Vec<WalEntry> {
        let path = crate::paths::recovered_edits_path(root, key);
        let log = LogFile {
            len: fs::metadata(&path).unwrap().len(),
            path,
        };
        let mut reader = LogReader::open(&LocalFs::new(), &log).unwrap();
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().unwrap() {
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn flush_writes_each_region_in_order() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFs::new();
        let config = SplitConfig::default();
        let writers = WriterTable::new();

        let mut batch = BatchMap::new();
        for e in [entry(b"a", 1), entry(b"a", 2), entry(b"b", 1)] {
            batch.entry(e.key.region.clone()).or_default().push(e);
        }
        flush_batch(&fs, temp.path(), batch, &writers, &config).unwrap();

        let (paths, close_err) = writers.close_all();
        assert!(close_err.is_none());
        assert_eq!(paths.len(), 2);

        let a = read_back(temp.path(), &entry(b"a", 1).key);
        assert_eq!(
            a.iter().map(|e| e.key.sequence_id).collect::<Vec<_>>(),
            [1, 2]
        );
        let b = read_back(temp.path(), &entry(b"b", 1).key);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn writers_persist_across_batches() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFs::new();
        let config = SplitConfig::default();
        let writers = WriterTable::new();

        let mut first = BatchMap::new();
        first
            .entry(entry(b"a", 1).key.region.clone())
            .or_default()
            .push(entry(b"a", 1));
        flush_batch(&fs, temp.path(), first, &writers, &config).unwrap();

        let mut second = BatchMap::new();
        second
            .entry(entry(b"a", 2).key.region.clone())
            .or_default()
            .push(entry(b"a", 2));
        flush_batch(&fs, temp.path(), second, &writers, &config).unwrap();

        let (paths, close_err) = writers.close_all();
        assert!(close_err.is_none());
        // One writer for the region across both batches, so both edits are
        // in one file.
        assert_eq!(paths.len(), 1);
        let a = read_back(temp.path(), &entry(b"a", 1).key);
        assert_eq!(
            a.iter().map(|e| e.key.sequence_id).collect::<Vec<_>>(),
            [1, 2]
        );
    }

    #[test]
    fn flush_of_empty_batch_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let writers = WriterTable::new();
        flush_batch(
            &LocalFs::new(),
            temp.path(),
            BatchMap::new(),
            &writers,
            &SplitConfig::default(),
        )
        .unwrap();
        let (paths, _) = writers.close_all();
        assert!(paths.is_empty());
    }

    #[test]
    fn many_regions_with_few_threads_all_flush() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFs::new();
        let config = SplitConfig {
            writer_threads: 2,
            ..SplitConfig::default()
        };
        let writers = WriterTable::new();

        let mut batch = BatchMap::new();
        for r in 0..16u8 {
            let e = entry(&[b'r', r], 1);
            batch.entry(e.key.region.clone()).or_default().push(e);
        }
        flush_batch(&fs, temp.path(), batch, &writers, &config).unwrap();

        let (paths, close_err) = writers.close_all();
        assert!(close_err.is_none());
        assert_eq!(paths.len(), 16);
        for path in paths {
            assert!(path.exists());
        }
    }
}
