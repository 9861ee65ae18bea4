//! Path layout for recovered edits, archive and quarantine directories.

use std::path::{Path, PathBuf};

use crate::config::SplitConfig;
use crate::wal::{EntryKey, RegionKey};

/// File that holds the recovered edits written by the splitter, one per
/// region.
pub const RECOVERED_EDITS: &str = "recovered.edits";

pub fn table_dir(root_dir: &Path, table: &[u8]) -> PathBuf {
    root_dir.join(String::from_utf8_lossy(table).as_ref())
}

/// Region directories are named by a hash of the raw region key, which keeps
/// arbitrary key bytes out of path components.
pub fn encoded_region_name(region: &RegionKey) -> String {
    format!("{}", crc32c::crc32c(region.as_bytes()))
}

pub fn region_dir(table_dir: &Path, region: &RegionKey) -> PathBuf {
    table_dir.join(encoded_region_name(region))
}

pub fn recovered_edits_path(root_dir: &Path, key: &EntryKey) -> PathBuf {
    region_dir(&table_dir(root_dir, key.table.as_ref()), &key.region).join(RECOVERED_EDITS)
}

/// Archive target for a processed log; the file name is preserved.
pub fn archive_path(old_log_dir: &Path, log: &Path) -> PathBuf {
    match log.file_name() {
        Some(name) => old_log_dir.join(name),
        None => old_log_dir.to_path_buf(),
    }
}

/// Quarantine directory for unparseable logs, under the store root.
pub fn corrupt_dir(root_dir: &Path, config: &SplitConfig) -> PathBuf {
    root_dir.join(&config.corrupt_dir_name)
}
