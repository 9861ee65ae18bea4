//! Commit-log entry codec, reader and per-region writer.

use std::path::PathBuf;

use thiserror::Error;

pub mod entry;
pub mod frame;
pub mod reader;
pub mod writer;

pub use entry::{EntryKey, RegionKey, WalEntry, MAX_ENTRY_BYTES};
pub use frame::{FrameReader, FrameWriter};
pub use reader::{LogReader, LOG_FORMAT_VERSION, LOG_MAGIC};
pub use writer::EditsWriter;

pub type WalResult<T> = Result<T, WalError>;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },
    #[error("log file header invalid at {path:?}: {reason}")]
    FileHeaderInvalid { path: PathBuf, reason: String },
    #[error("frame magic mismatch: got {got:#x}")]
    FrameMagicMismatch { got: u32 },
    #[error("frame truncated: {reason}")]
    FrameTruncated { reason: String },
    #[error("frame crc32c mismatch: expected {expected:#x}, got {got:#x}")]
    FrameCrcMismatch { expected: u32, got: u32 },
    #[error("entry exceeds max bytes {max_bytes} (got {got_bytes})")]
    EntryTooLarge { max_bytes: usize, got_bytes: usize },
    #[error("entry invalid: {reason}")]
    EntryInvalid { reason: String },
}

impl WalError {
    /// Attach a path to an `Io` error that was raised without one.
    pub(crate) fn at_path(self, path: &std::path::Path) -> Self {
        match self {
            WalError::Io { path: None, source } => WalError::Io {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        }
    }
}
