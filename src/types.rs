//! Crate-wide scalar types shared across the storage kernel.

use serde::{Deserialize, Serialize};

/// A page identifier. Page 0 is reserved for the file header.
pub type PageId = u32;

/// A write-ahead log sequence number. Strictly increasing across the log.
pub type Lsn = u64;

/// A transaction identifier, monotonically assigned by the transaction manager.
pub type TxnId = u64;

/// Stable address of a document slot within a data page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentLocation {
    pub page_id: PageId,
    pub slot_index: u16,
}

impl DocumentLocation {
    #[must_use]
    pub const fn new(page_id: PageId, slot_index: u16) -> Self {
        Self { page_id, slot_index }
    }
}

/// Transaction isolation level, both variants MVCC-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// Each read observes the latest committed version at read time.
    #[default]
    ReadCommitted,
    /// Reads see the state at `snapshot_id` throughout the transaction.
    Snapshot,
}

/// Runtime configuration for `open`.
#[derive(Debug, Clone)]
pub struct OpenConfig {
    /// Page size in bytes; power of two in `[4096, 65536]`.
    pub page_size: u32,
    /// Soft budget, in pages, for the buffered page cache.
    pub cache_capacity: usize,
    /// Isolation level used by `begin_transaction` when the caller doesn't override it.
    pub default_isolation: Isolation,
    /// Checkpoint automatically every N committed transactions.
    pub checkpoint_interval_commits: u64,
}

impl Default for OpenConfig {
    fn default() -> Self {
        Self {
            page_size: 8192,
            cache_capacity: 1024,
            default_isolation: Isolation::ReadCommitted,
            checkpoint_interval_commits: 256,
        }
    }
}
