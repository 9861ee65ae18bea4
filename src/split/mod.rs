//! Split orchestration: batch iteration, corruption bookkeeping, archival
//! and source-directory cleanup.

use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;

use crate::config::{SplitConfig, SplitterKind};
use crate::fs::{LogFile, SplitFs};
use crate::paths;
use crate::wal::{RegionKey, WalError};

pub mod batch;
pub mod flush;

pub use batch::{parse_log, BatchMap};
pub use flush::{flush_batch, WriterTable};

pub type SplitResult<T> = Result<T, SplitError>;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },
    #[error("failed parsing log {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: WalError,
    },
    #[error("failed writing edits for region {region}: {source}")]
    Writer {
        region: RegionKey,
        #[source]
        source: WalError,
    },
    #[error("failed closing recovered-edits file {path:?}: {source}")]
    WriterClose {
        path: PathBuf,
        #[source]
        source: WalError,
    },
    #[error(
        "discovered orphan log after split ({listed} listed, {accounted} accounted); \
         maybe the region server was not dead when the split started"
    )]
    OrphanLogs { listed: usize, accounted: usize },
    #[error("log writer pool interrupted with {pending} region task(s) outstanding; possible data loss")]
    Interrupted { pending: usize },
    #[error("cannot delete {path:?}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A log splitter, constructed from configuration.
///
/// The implementation variant is chosen once at construction; callers only
/// see [`split_log`](LogSplitter::split_log).
pub enum LogSplitter {
    Batched(BatchedSplitter),
}

impl LogSplitter {
    pub fn from_config(config: SplitConfig) -> Self {
        let config = config.normalized();
        match config.splitter {
            SplitterKind::Batched => Self::Batched(BatchedSplitter::new(config)),
        }
    }

    /// Split every commit log under `src_dir` into per-region recovered-edits
    /// files under `root_dir`, archiving processed inputs to `old_log_dir`
    /// and deleting the emptied source directory.
    ///
    /// Returns the recovered-edits paths in region order. Idempotent when
    /// re-run over a partially-completed split: pre-existing recovered-edits
    /// files are truncated.
    pub fn split_log(
        &self,
        root_dir: &Path,
        src_dir: &Path,
        old_log_dir: &Path,
        fs: &dyn SplitFs,
    ) -> SplitResult<Vec<PathBuf>> {
        match self {
            Self::Batched(splitter) => splitter.split_log(root_dir, src_dir, old_log_dir, fs),
        }
    }
}

/// The streaming, batching splitter: parses a fixed number of logs into an
/// in-memory per-region map, flushes the map with a bounded worker pool,
/// and repeats. Memory is bounded by batch size times mean log size.
pub struct BatchedSplitter {
    config: SplitConfig,
}

impl BatchedSplitter {
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    pub fn split_log(
        &self,
        root_dir: &Path,
        src_dir: &Path,
        old_log_dir: &Path,
        fs: &dyn SplitFs,
    ) -> SplitResult<Vec<PathBuf>> {
        let started = Instant::now();

        if !fs.exists(src_dir).map_err(|source| SplitError::Io {
            path: Some(src_dir.to_path_buf()),
            source,
        })? {
            return Ok(Vec::new());
        }
        let logs = fs.list(src_dir).map_err(|source| SplitError::Io {
            path: Some(src_dir.to_path_buf()),
            source,
        })?;
        if logs.is_empty() {
            fs.delete_recursive(src_dir)
                .map_err(|source| SplitError::Cleanup {
                    path: src_dir.to_path_buf(),
                    source,
                })?;
            return Ok(Vec::new());
        }

        tracing::info!(
            logs = logs.len(),
            src_dir = %src_dir.display(),
            "splitting logs"
        );

        let writers = WriterTable::new();
        let run = self.run_batches(root_dir, src_dir, old_log_dir, &logs, fs, &writers);
        let (splits, close_err) = writers.close_all();

        match run {
            Err(err) => {
                // The run error wins; close failures were already logged.
                Err(err)
            }
            Ok(()) => {
                if let Some((path, source)) = close_err {
                    return Err(SplitError::WriterClose { path, source });
                }
                fs.delete_recursive(src_dir)
                    .map_err(|source| SplitError::Cleanup {
                        path: src_dir.to_path_buf(),
                        source,
                    })?;
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    src_dir = %src_dir.display(),
                    "log splitting completed"
                );
                Ok(splits)
            }
        }
    }

    fn run_batches(
        &self,
        root_dir: &Path,
        src_dir: &Path,
        old_log_dir: &Path,
        logs: &[LogFile],
        fs: &dyn SplitFs,
        writers: &WriterTable,
    ) -> SplitResult<()> {
        let mut processed: Vec<PathBuf> = Vec::new();
        let mut corrupted: Vec<PathBuf> = Vec::new();

        for (batch_index, chunk) in logs.chunks(self.config.batch_size).enumerate() {
            let mut batch = BatchMap::new();
            for (offset, log) in chunk.iter().enumerate() {
                let index = batch_index * self.config.batch_size + offset + 1;
                tracing::debug!(
                    index,
                    total = logs.len(),
                    path = %log.path.display(),
                    length = log.len,
                    "splitting log"
                );
                fs.recover_lease(&log.path)
                    .map_err(|source| SplitError::Io {
                        path: Some(log.path.clone()),
                        source,
                    })?;
                match parse_log(fs, log, &mut batch) {
                    Ok(_) => processed.push(log.path.clone()),
                    Err(err) if self.config.skip_parse_errors => {
                        tracing::warn!(
                            path = %log.path.display(),
                            error = %err,
                            "failed parsing log, marking as corrupted"
                        );
                        corrupted.push(log.path.clone());
                    }
                    Err(source) => {
                        return Err(SplitError::Parse {
                            path: log.path.clone(),
                            source,
                        });
                    }
                }
            }
            flush_batch(fs, root_dir, batch, writers, &self.config)?;
        }

        let listed = fs.list(src_dir).map_err(|source| SplitError::Io {
            path: Some(src_dir.to_path_buf()),
            source,
        })?;
        let accounted = processed.len() + corrupted.len();
        if listed.len() != accounted {
            return Err(SplitError::OrphanLogs {
                listed: listed.len(),
                accounted,
            });
        }

        self.archive_logs(root_dir, old_log_dir, &corrupted, &processed, fs)
    }

    /// Move corrupted logs to the quarantine directory and processed logs to
    /// the archive, preserving file names.
    fn archive_logs(
        &self,
        root_dir: &Path,
        old_log_dir: &Path,
        corrupted: &[PathBuf],
        processed: &[PathBuf],
        fs: &dyn SplitFs,
    ) -> SplitResult<()> {
        let corrupt_dir = paths::corrupt_dir(root_dir, &self.config);
        fs.mkdirs(&corrupt_dir).map_err(|source| SplitError::Io {
            path: Some(corrupt_dir.clone()),
            source,
        })?;
        fs.mkdirs(old_log_dir).map_err(|source| SplitError::Io {
            path: Some(old_log_dir.to_path_buf()),
            source,
        })?;

        for log in corrupted {
            let target = paths::archive_path(&corrupt_dir, log);
            tracing::info!(
                from = %log.display(),
                to = %target.display(),
                "moving corrupted log to quarantine"
            );
            fs.rename(log, &target).map_err(|source| SplitError::Io {
                path: Some(log.clone()),
                source,
            })?;
        }

        for log in processed {
            let target = paths::archive_path(old_log_dir, log);
            fs.rename(log, &target).map_err(|source| SplitError::Io {
                path: Some(log.clone()),
                source,
            })?;
            tracing::info!(
                from = %log.display(),
                to = %target.display(),
                "archived processed log"
            );
        }
        Ok(())
    }
}
