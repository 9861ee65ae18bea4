//! Split run configuration.

use serde::{Deserialize, Serialize};

/// Immutable configuration for a split run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Number of logs parsed into one in-memory batch. More means faster but
    /// bigger memory consumption.
    pub batch_size: usize,
    /// Worker threads writing recovered edits. More means faster but bigger
    /// memory consumption.
    pub writer_threads: usize,
    /// Quarantine an unparseable log instead of failing the whole split.
    pub skip_parse_errors: bool,
    /// Tolerate an interrupted writer pool (possible data loss) instead of
    /// failing the whole split. Writer task failures are always fatal.
    pub skip_writer_errors: bool,
    /// Name of the quarantine directory under the store root.
    pub corrupt_dir_name: String,
    /// Which splitter implementation to construct.
    pub splitter: SplitterKind,
    pub lease_retry_attempts: u32,
    pub lease_backoff_base_ms: u64,
    pub lease_backoff_max_ms: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            writer_threads: 3,
            skip_parse_errors: false,
            skip_writer_errors: false,
            corrupt_dir_name: ".corrupt".to_string(),
            splitter: SplitterKind::Batched,
            lease_retry_attempts: 3,
            lease_backoff_base_ms: 250,
            lease_backoff_max_ms: 5_000,
        }
    }
}

impl SplitConfig {
    /// Clamp degenerate sizes; a batch or pool of zero means one.
    pub(crate) fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.writer_threads = self.writer_threads.max(1);
        self
    }
}

/// Splitter implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitterKind {
    /// The streaming, batching splitter.
    Batched,
}
