//! Batch demultiplexer: one log file into per-region entry queues.

use std::collections::BTreeMap;

use crate::fs::{LogFile, SplitFs};
use crate::wal::{LogReader, RegionKey, WalEntry, WalResult};

/// Edits of one batch, indexed by region. Ordered so flushing iterates
/// regions deterministically; each queue preserves read order.
pub type BatchMap = BTreeMap<RegionKey, Vec<WalEntry>>;

/// Parse one log into `batch`, returning the number of entries pushed.
///
/// All-or-nothing per file: entries are buffered and merged into the batch
/// only once the whole stream has parsed, so a log that turns out to be
/// corrupt mid-stream contributes nothing.
pub fn parse_log(fs: &dyn SplitFs, log: &LogFile, batch: &mut BatchMap) -> WalResult<usize> {
    let mut reader = LogReader::open(fs, log)?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry()? {
        entries.push(entry);
    }

    let pushed = entries.len();
    for entry in entries {
        batch
            .entry(entry.key.region.clone())
            .or_default()
            .push(entry);
    }
    tracing::debug!(
        path = %log.path.display(),
        entries = pushed,
        "pushed entries from log"
    );
    Ok(pushed)
}
