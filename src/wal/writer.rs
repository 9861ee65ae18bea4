//! Per-region recovered-edits writer.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::entry::{EntryKey, WalEntry, MAX_ENTRY_BYTES};
use super::frame::encode_frame;
use super::reader::{LOG_FORMAT_VERSION, LOG_MAGIC};
use super::{WalError, WalResult};
use crate::fs::{SplitFs, WritableLog};
use crate::paths;

/// Append handle for one region's recovered-edits file. Created lazily on the
/// region's first entry and closed exactly once at the end of the split run.
pub struct EditsWriter {
    out: BufWriter<Box<dyn WritableLog>>,
    path: PathBuf,
    edits_written: u64,
}

impl EditsWriter {
    /// Create the recovered-edits file for `key`'s region under `root_dir`.
    ///
    /// A file left behind by a previous failed split attempt is deleted
    /// first, so a rerun starts from an empty file.
    pub fn create(fs: &dyn SplitFs, root_dir: &Path, key: &EntryKey) -> WalResult<Self> {
        let path = paths::recovered_edits_path(root_dir, key);
        if let Some(dir) = path.parent() {
            fs.mkdirs(dir).map_err(|source| WalError::Io {
                path: Some(dir.to_path_buf()),
                source,
            })?;
        }

        if fs.exists(&path).map_err(|source| WalError::Io {
            path: Some(path.clone()),
            source,
        })? {
            let len = fs.file_len(&path).map_err(|source| WalError::Io {
                path: Some(path.clone()),
                source,
            })?;
            tracing::warn!(
                path = %path.display(),
                length = len,
                "found existing recovered-edits file from a previous failed split attempt, deleting"
            );
            fs.delete_file(&path).map_err(|source| WalError::Io {
                path: Some(path.clone()),
                source,
            })?;
        }

        let inner = fs.open_writer(&path).map_err(|source| WalError::Io {
            path: Some(path.clone()),
            source,
        })?;
        let mut out = BufWriter::new(inner);
        out.write_all(LOG_MAGIC)
            .and_then(|()| out.write_all(&LOG_FORMAT_VERSION.to_le_bytes()))
            .map_err(|source| WalError::Io {
                path: Some(path.clone()),
                source,
            })?;

        Ok(Self {
            out,
            path,
            edits_written: 0,
        })
    }

    pub fn append(&mut self, entry: &WalEntry) -> WalResult<()> {
        let frame = encode_frame(entry, MAX_ENTRY_BYTES)?;
        self.out
            .write_all(&frame)
            .map_err(|source| WalError::Io {
                path: Some(self.path.clone()),
                source,
            })?;
        self.edits_written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn edits_written(&self) -> u64 {
        self.edits_written
    }

    /// Flush buffered frames and make the file durable.
    pub fn close(mut self) -> WalResult<()> {
        self.out
            .flush()
            .and_then(|()| self.out.get_mut().sync())
            .map_err(|source| WalError::Io {
                path: Some(self.path.clone()),
                source,
            })
    }
}
