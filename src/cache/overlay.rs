//! MVCC-aware read path over the page file (§4.E).
//!
//! Two tiers sit in front of `PageFile`:
//! - `dirty`: committed-but-not-yet-checkpointed after-images, keyed by page
//!   id, unbounded and never evicted — a dirty page only ever leaves this
//!   map by being written through to disk at checkpoint.
//! - `clean`: a bounded LRU of pages known to match what's on disk, a pure
//!   read cache.
//!
//! Writers stage uncommitted after-images per `(txn_id, page_id)` in
//! `in_flight`; at commit they are promoted into `dirty` under the commit
//! LSN, at abort they are dropped.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::cache::config::CacheConfig;
use crate::cache::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::errors::Result;
use crate::page::PageFile;
use crate::types::{Lsn, PageId, TxnId};

#[derive(Debug, Clone)]
struct CachedPage {
    lsn: Lsn,
    bytes: Vec<u8>,
}

pub struct PageCache {
    disk: Arc<PageFile>,
    clean: Mutex<LruCache<PageId, CachedPage>>,
    dirty: RwLock<HashMap<PageId, CachedPage>>,
    in_flight: RwLock<HashMap<(TxnId, PageId), Vec<u8>>>,
    metrics: CacheMetrics,
}

impl PageCache {
    #[must_use]
    pub fn new(disk: Arc<PageFile>, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).unwrap();
        Self {
            disk,
            clean: Mutex::new(LruCache::new(capacity)),
            dirty: RwLock::new(HashMap::new()),
            in_flight: RwLock::new(HashMap::new()),
            metrics: CacheMetrics::default(),
        }
    }

    /// Returns the page contents visible to a reader at `snapshot_lsn`: the
    /// committed overlay image if one exists and is old enough, otherwise
    /// the on-disk image (which always reflects the state as of the last
    /// checkpoint).
    pub fn read_page(&self, page_id: PageId, snapshot_lsn: Lsn) -> Result<Vec<u8>> {
        if let Some(cp) = self.dirty.read().get(&page_id) {
            if cp.lsn <= snapshot_lsn {
                self.metrics.record_hit();
                return Ok(cp.bytes.clone());
            }
        }
        if let Some(cp) = self.clean.lock().get(&page_id) {
            self.metrics.record_hit();
            return Ok(cp.bytes.clone());
        }
        self.metrics.record_miss();
        let bytes = self.disk.read_page(page_id)?;
        self.insert_clean(page_id, bytes.clone());
        Ok(bytes)
    }

    fn insert_clean(&self, page_id: PageId, bytes: Vec<u8>) {
        let mut clean = self.clean.lock();
        if clean.len() >= clean.cap().get() && !clean.contains(&page_id) {
            if clean.pop_lru().is_some() {
                self.metrics.record_eviction();
            }
        }
        clean.put(page_id, CachedPage { lsn: 0, bytes });
    }

    /// Stages an uncommitted after-image for `page_id` under `txn_id`.
    pub fn buffer_write(&self, txn_id: TxnId, page_id: PageId, bytes: Vec<u8>) {
        self.in_flight.write().insert((txn_id, page_id), bytes);
    }

    /// Reads back a page as staged (or committed, or on-disk) by `txn_id`'s
    /// own transaction, so a transaction always observes its own writes.
    pub fn read_page_for_txn(&self, txn_id: TxnId, page_id: PageId, snapshot_lsn: Lsn) -> Result<Vec<u8>> {
        if let Some(bytes) = self.in_flight.read().get(&(txn_id, page_id)) {
            return Ok(bytes.clone());
        }
        self.read_page(page_id, snapshot_lsn)
    }

    /// Promotes every page `txn_id` staged into the committed overlay under
    /// `commit_lsn`. Returns the set of page ids promoted, for the
    /// checkpointer's bookkeeping.
    pub fn promote_commit(&self, txn_id: TxnId, commit_lsn: Lsn) -> Vec<PageId> {
        let mut in_flight = self.in_flight.write();
        let keys: Vec<(TxnId, PageId)> =
            in_flight.keys().filter(|(t, _)| *t == txn_id).copied().collect();
        let mut promoted = Vec::with_capacity(keys.len());
        let mut dirty = self.dirty.write();
        for key in keys {
            if let Some(bytes) = in_flight.remove(&key) {
                let page_id = key.1;
                dirty.insert(page_id, CachedPage { lsn: commit_lsn, bytes });
                promoted.push(page_id);
            }
        }
        promoted
    }

    /// Drops every page `txn_id` staged, uncommitted.
    pub fn discard(&self, txn_id: TxnId) {
        self.in_flight.write().retain(|(t, _), _| *t != txn_id);
    }

    /// Writes every dirty page through to disk and clears the overlay.
    /// Called by the checkpointer once the corresponding WAL records are
    /// themselves durable.
    pub fn flush_dirty(&self) -> Result<Vec<PageId>> {
        let drained: Vec<(PageId, CachedPage)> = self.dirty.write().drain().collect();
        let mut flushed = Vec::with_capacity(drained.len());
        for (page_id, cp) in drained {
            let mut bytes = cp.bytes.clone();
            self.disk.write_page(page_id, &mut bytes)?;
            self.insert_clean(page_id, bytes);
            flushed.push(page_id);
        }
        Ok(flushed)
    }

    #[must_use]
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageType;
    use tempfile::tempdir;

    fn fresh_cache() -> (tempfile::TempDir, PageCache, PageId) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.blite");
        let disk = Arc::new(PageFile::create(&path, 512).unwrap());
        let page_id = disk.allocate_page(PageType::Data).unwrap();
        let cache = PageCache::new(disk, CacheConfig { capacity: 2 });
        (dir, cache, page_id)
    }

    #[test]
    fn uncommitted_write_invisible_to_other_readers() {
        let (_dir, cache, page_id) = fresh_cache();
        cache.buffer_write(1, page_id, vec![9u8; 512]);
        let seen = cache.read_page(page_id, u64::MAX).unwrap();
        assert_ne!(seen, vec![9u8; 512]);
    }

    #[test]
    fn committed_write_visible_at_or_after_its_lsn() {
        let (_dir, cache, page_id) = fresh_cache();
        cache.buffer_write(1, page_id, vec![9u8; 512]);
        let promoted = cache.promote_commit(1, 5);
        assert_eq!(promoted, vec![page_id]);
        assert_ne!(cache.read_page(page_id, 4).unwrap(), vec![9u8; 512]);
        assert_eq!(cache.read_page(page_id, 5).unwrap(), vec![9u8; 512]);
    }

    #[test]
    fn discard_drops_uncommitted_write() {
        let (_dir, cache, page_id) = fresh_cache();
        cache.buffer_write(1, page_id, vec![9u8; 512]);
        cache.discard(1);
        assert_eq!(cache.promote_commit(1, 5), Vec::<PageId>::new());
    }

    #[test]
    fn flush_moves_dirty_page_to_disk() {
        let (_dir, cache, page_id) = fresh_cache();
        cache.buffer_write(1, page_id, vec![9u8; 512]);
        cache.promote_commit(1, 5);
        let flushed = cache.flush_dirty().unwrap();
        assert_eq!(flushed, vec![page_id]);
        let on_disk = cache.disk.read_page(page_id).unwrap();
        assert_eq!(on_disk, vec![9u8; 512]);
    }
}
