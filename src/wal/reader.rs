//! Log reader: file header validation and entry iteration.

use std::io::{BufReader, Read};
use std::path::PathBuf;

use super::entry::{WalEntry, MAX_ENTRY_BYTES};
use super::frame::FrameReader;
use super::{WalError, WalResult};
use crate::fs::{LogFile, SplitFs};

pub const LOG_MAGIC: &[u8; 4] = b"WLOG";
pub const LOG_FORMAT_VERSION: u32 = 1;
pub(crate) const LOG_HEADER_LEN: usize = LOG_MAGIC.len() + 4;

/// Reads the finite entry sequence of one commit log.
pub struct LogReader {
    frames: Option<FrameReader<BufReader<Box<dyn Read + Send>>>>,
    path: PathBuf,
}

impl std::fmt::Debug for LogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("path", &self.path)
            .field("at_eof", &self.frames.is_none())
            .finish()
    }
}

impl LogReader {
    /// Open a log for reading and validate its file header.
    ///
    /// A zero-length file is not an error: with append pipelines the
    /// filesystem can report zero length for a file that was never flushed.
    /// Such a file yields an empty sequence and a warning.
    pub fn open(fs: &dyn SplitFs, log: &LogFile) -> WalResult<Self> {
        let inner = fs.open_reader(&log.path).map_err(|source| WalError::Io {
            path: Some(log.path.clone()),
            source,
        })?;
        let mut reader = BufReader::new(inner);

        let mut header = [0u8; LOG_HEADER_LEN];
        match read_exact_or_eof(&mut reader, &mut header) {
            Ok(true) => {}
            Ok(false) => {
                if log.len == 0 {
                    tracing::warn!(
                        path = %log.path.display(),
                        "could not read log header, file is empty and might still be open"
                    );
                    return Ok(Self {
                        frames: None,
                        path: log.path.clone(),
                    });
                }
                return Err(WalError::FileHeaderInvalid {
                    path: log.path.clone(),
                    reason: "log file header truncated".to_string(),
                });
            }
            Err(source) => {
                return Err(WalError::Io {
                    path: Some(log.path.clone()),
                    source,
                });
            }
        }

        if &header[..LOG_MAGIC.len()] != LOG_MAGIC {
            return Err(WalError::FileHeaderInvalid {
                path: log.path.clone(),
                reason: format!("bad magic {:?}", &header[..LOG_MAGIC.len()]),
            });
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != LOG_FORMAT_VERSION {
            return Err(WalError::FileHeaderInvalid {
                path: log.path.clone(),
                reason: format!("unsupported log format version {version}"),
            });
        }

        Ok(Self {
            frames: Some(FrameReader::new(reader, MAX_ENTRY_BYTES)),
            path: log.path.clone(),
        })
    }

    /// Next entry, or `None` at end of log.
    pub fn next_entry(&mut self) -> WalResult<Option<WalEntry>> {
        match self.frames.as_mut() {
            None => Ok(None),
            Some(frames) => frames.read_next().map_err(|err| err.at_path(&self.path)),
        }
    }
}

/// Fill `buf` completely; `Ok(false)` means EOF before any or all bytes.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut read = 0usize;
    while read < buf.len() {
        let n = reader.read(&mut buf[read..])?;
        if n == 0 {
            return Ok(false);
        }
        read += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFs;
    use crate::wal::frame::encode_frame;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_log(path: &Path, entries: &[WalEntry]) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(LOG_MAGIC);
        bytes.extend_from_slice(&LOG_FORMAT_VERSION.to_le_bytes());
        for entry in entries {
            bytes.extend_from_slice(&encode_frame(entry, MAX_ENTRY_BYTES).unwrap());
        }
        fs::write(path, bytes).unwrap();
    }

    fn log_file(path: &Path) -> LogFile {
        LogFile {
            path: path.to_path_buf(),
            len: fs::metadata(path).unwrap().len(),
        }
    }

    #[test]
    fn reads_entries_in_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hlog.0");
        let entries = vec![
            WalEntry::new(&b"t"[..], &b"a"[..], 1, &b"one"[..]),
            WalEntry::new(&b"t"[..], &b"b"[..], 2, &b"two"[..]),
        ];
        write_log(&path, &entries);

        let fs = LocalFs::new();
        let mut reader = LogReader::open(&fs, &log_file(&path)).unwrap();
        assert_eq!(reader.next_entry().unwrap().unwrap(), entries[0]);
        assert_eq!(reader.next_entry().unwrap().unwrap(), entries[1]);
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn zero_length_file_yields_empty_sequence() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hlog.0");
        fs::write(&path, b"").unwrap();

        let fs = LocalFs::new();
        let mut reader = LogReader::open(&fs, &log_file(&path)).unwrap();
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn nonempty_file_with_short_header_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hlog.0");
        fs::write(&path, b"WLO").unwrap();

        let fs = LocalFs::new();
        let err = LogReader::open(&fs, &log_file(&path)).unwrap_err();
        assert!(matches!(err, WalError::FileHeaderInvalid { .. }));
    }

    #[test]
    fn bad_magic_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hlog.0");
        fs::write(&path, b"XLOG\x01\x00\x00\x00").unwrap();

        let fs = LocalFs::new();
        let err = LogReader::open(&fs, &log_file(&path)).unwrap_err();
        assert!(matches!(err, WalError::FileHeaderInvalid { .. }));
    }

    #[test]
    fn corrupt_frame_mid_stream_is_an_error_with_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hlog.0");
        let entries = vec![WalEntry::new(&b"t"[..], &b"a"[..], 1, &b"one"[..])];
        write_log(&path, &entries);
        // Flip a payload byte so the crc no longer matches.
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let fs = LocalFs::new();
        let mut reader = LogReader::open(&fs, &log_file(&path)).unwrap();
        let err = reader.next_entry().unwrap_err();
        assert!(matches!(err, WalError::FrameCrcMismatch { .. }));
    }
}
