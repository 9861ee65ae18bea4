//! Narrow filesystem capability set used by the splitter.
//!
//! Everything the splitter does to storage goes through [`SplitFs`], so tests
//! and alternate backends can substitute their own implementation. All
//! operations must be safe to call concurrently; the region flusher does.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::config::SplitConfig;

/// A log file discovered by a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFile {
    pub path: PathBuf,
    pub len: u64,
}

/// An open append target. `sync` must not return until written bytes are
/// durable.
pub trait WritableLog: Write + Send + std::fmt::Debug {
    fn sync(&mut self) -> io::Result<()>;
}

pub trait SplitFs: Send + Sync {
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// List the plain files directly under `dir`, in stable name order.
    /// A missing directory lists empty.
    fn list(&self, dir: &Path) -> io::Result<Vec<LogFile>>;

    fn file_len(&self, path: &Path) -> io::Result<u64>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn delete_file(&self, path: &Path) -> io::Result<()>;

    fn delete_recursive(&self, path: &Path) -> io::Result<()>;

    fn mkdirs(&self, path: &Path) -> io::Result<()>;

    /// Block until no writer holds the file open for append. Only after this
    /// returns is a freshly-dead server's log safe to read end to end.
    fn recover_lease(&self, path: &Path) -> io::Result<()>;

    fn open_reader(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Create `path` for writing. The file must not already exist.
    fn open_writer(&self, path: &Path) -> io::Result<Box<dyn WritableLog>>;
}

/// Local-disk implementation. Lease recovery reopens the file for append,
/// syncs and closes it, retrying transient failures with capped backoff.
#[derive(Clone, Debug)]
pub struct LocalFs {
    lease_retry_attempts: u32,
    lease_backoff_base: Duration,
    lease_backoff_max: Duration,
}

impl LocalFs {
    pub fn new() -> Self {
        Self::from_config(&SplitConfig::default())
    }

    pub fn from_config(config: &SplitConfig) -> Self {
        Self {
            lease_retry_attempts: config.lease_retry_attempts.max(1),
            lease_backoff_base: Duration::from_millis(config.lease_backoff_base_ms),
            lease_backoff_max: Duration::from_millis(config.lease_backoff_max_ms),
        }
    }
}

impl Default for LocalFs {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitFs for LocalFs {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        match fs::metadata(path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<LogFile>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            files.push(LogFile {
                path: entry.path(),
                len: entry.metadata()?.len(),
            });
        }
        files.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
        Ok(files)
    }

    fn file_len(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn delete_recursive(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn mkdirs(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn recover_lease(&self, path: &Path) -> io::Result<()> {
        let mut backoff = self.lease_backoff_base;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match reopen_for_append(path) {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= self.lease_retry_attempts => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        attempt,
                        error = %err,
                        "lease recovery failed, retrying"
                    );
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.lease_backoff_max);
                }
            }
        }
    }

    fn open_reader(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn open_writer(&self, path: &Path) -> io::Result<Box<dyn WritableLog>> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Box::new(LocalWritable(file)))
    }
}

#[derive(Debug)]
struct LocalWritable(File);

impl Write for LocalWritable {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl WritableLog for LocalWritable {
    fn sync(&mut self) -> io::Result<()> {
        self.0.sync_all()
    }
}

fn reopen_for_append(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().append(true).open(path)?;
    file.sync_all()?;
    Ok(())
}
