//! Cache sizing knobs, mirrored after the teacher's `CacheConfig` shape.

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Soft budget, in pages, for the clean read cache. The dirty
    /// (committed, uncheckpointed) overlay is never bounded by this —
    /// those pages are pinned until the next checkpoint flushes them.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}
