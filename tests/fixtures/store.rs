//! Test fixtures: a temp store layout, log-file builders and corruption
//! helpers.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walsplit::wal::frame::encode_frame;
use walsplit::wal::{LOG_FORMAT_VERSION, LOG_MAGIC, MAX_ENTRY_BYTES};
use walsplit::{LocalFs, LogFile, LogReader, WalEntry};

/// A store root with the directory layout the splitter operates on: a source
/// log directory named for the dead server and an archive directory.
pub struct TempStore {
    temp: TempDir,
}

impl TempStore {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let store = Self {
            temp: TempDir::new().expect("create temp store"),
        };
        fs::create_dir_all(store.src_dir()).expect("create src dir");
        store
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root().join("log_host1_8020_1700000000000")
    }

    pub fn old_log_dir(&self) -> PathBuf {
        self.root().join(".oldlogs")
    }

    pub fn corrupt_dir(&self) -> PathBuf {
        self.root().join(".corrupt")
    }

    /// Write a commit log named `name` into the source directory.
    pub fn write_log(&self, name: &str, entries: &[WalEntry]) -> PathBuf {
        let path = self.src_dir().join(name);
        fs::write(&path, log_bytes(entries)).expect("write log");
        path
    }

    /// Write a zero-length log, modeling an append that was never flushed.
    pub fn write_empty_log(&self, name: &str) -> PathBuf {
        let path = self.src_dir().join(name);
        fs::write(&path, b"").expect("write empty log");
        path
    }

    pub fn list_src(&self) -> Vec<String> {
        list_names(&self.src_dir())
    }

    pub fn list_old_logs(&self) -> Vec<String> {
        list_names(&self.old_log_dir())
    }

    pub fn list_corrupt(&self) -> Vec<String> {
        list_names(&self.corrupt_dir())
    }

    /// Read back the recovered edits for the region of `key_entry`.
    pub fn read_recovered(&self, key_entry: &WalEntry) -> Vec<WalEntry> {
        let path = walsplit::paths::recovered_edits_path(self.root(), &key_entry.key);
        read_log(&path)
    }

    pub fn recovered_edits_path(&self, key_entry: &WalEntry) -> PathBuf {
        walsplit::paths::recovered_edits_path(self.root(), &key_entry.key)
    }
}

pub fn entry(table: &'static [u8], region: &'static [u8], seq: u64) -> WalEntry {
    WalEntry::new(table, region, seq, format!("edit-{seq}"))
}

pub fn log_bytes(entries: &[WalEntry]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(LOG_MAGIC);
    bytes.extend_from_slice(&LOG_FORMAT_VERSION.to_le_bytes());
    for entry in entries {
        bytes.extend_from_slice(&encode_frame(entry, MAX_ENTRY_BYTES).expect("encode frame"));
    }
    bytes
}

/// Flip the last byte of the file, breaking the final frame's crc.
pub fn corrupt_last_frame(path: &Path) {
    let mut bytes = fs::read(path).expect("read log");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(path, bytes).expect("rewrite log");
}

pub fn read_log(path: &Path) -> Vec<WalEntry> {
    let log = LogFile {
        len: fs::metadata(path).expect("log metadata").len(),
        path: path.to_path_buf(),
    };
    let mut reader = LogReader::open(&LocalFs::new(), &log).expect("open log");
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().expect("read entry") {
        entries.push(entry);
    }
    entries
}

fn list_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
