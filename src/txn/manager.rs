//! Transaction manager: ids, the active set, per-page write locks, and the
//! commit/abort/checkpoint protocols (§4.D).

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};
use parking_lot::Mutex;

use crate::cache::PageCache;
use crate::errors::{DbError, Result};
use crate::page::PageFile;
use crate::txn::transaction::Transaction;
use crate::types::{Isolation, Lsn, PageId, TxnId};
use crate::wal::{WalRecord, WriteAheadLog};

pub struct TransactionManager {
    next_txn_id: AtomicU64,
    committed_lsn: AtomicU64,
    active: Mutex<HashSet<TxnId>>,
    page_locks: Mutex<HashMap<PageId, TxnId>>,
    commits_since_checkpoint: AtomicU64,
    wal: Arc<WriteAheadLog>,
    cache: Arc<PageCache>,
    disk: Arc<PageFile>,
}

impl TransactionManager {
    #[must_use]
    pub fn new(wal: Arc<WriteAheadLog>, cache: Arc<PageCache>, disk: Arc<PageFile>, committed_lsn: Lsn) -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            committed_lsn: AtomicU64::new(committed_lsn),
            active: Mutex::new(HashSet::new()),
            page_locks: Mutex::new(HashMap::new()),
            commits_since_checkpoint: AtomicU64::new(0),
            wal,
            cache,
            disk,
        }
    }

    #[must_use]
    pub fn committed_lsn(&self) -> Lsn {
        self.committed_lsn.load(Ordering::Acquire)
    }

    /// Starts a new transaction, capturing `committed_lsn` as its snapshot.
    pub fn begin(&self, isolation: Isolation) -> Result<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::AcqRel);
        let snapshot_id = self.committed_lsn();
        self.wal.append(WalRecord::Begin { txn_id: id })?;
        self.active.lock().insert(id);
        debug!("txn {id} begin, snapshot_id={snapshot_id}, isolation={isolation:?}");
        Ok(Transaction::new(id, snapshot_id, isolation))
    }

    /// Acquires an exclusive lock on `page_id` for `txn.id`, failing with
    /// `Conflict` if another active transaction already holds it. Re-locking
    /// a page already held by the same transaction is a no-op.
    pub fn acquire_page_lock(&self, txn: &Transaction, page_id: PageId) -> Result<()> {
        txn.check_active()?;
        let mut locks = self.page_locks.lock();
        match locks.get(&page_id) {
            Some(holder) if *holder != txn.id => Err(DbError::Conflict),
            _ => {
                locks.insert(page_id, txn.id);
                Ok(())
            }
        }
    }

    /// Stages a page write: appends a `Write` WAL record with both images,
    /// buffers the after-image in the cache, and records the page in the
    /// transaction's write-set. `before` is the page's current content
    /// visible to this transaction (the engine reads it prior to mutating).
    pub fn stage_write(
        &self,
        txn: &mut Transaction,
        page_id: PageId,
        before: Vec<u8>,
        after: Vec<u8>,
    ) -> Result<()> {
        txn.check_active()?;
        self.acquire_page_lock(txn, page_id)?;
        self.wal.append(WalRecord::Write { txn_id: txn.id, page_id, before, after: after.clone() })?;
        self.cache.buffer_write(txn.id, page_id, after);
        txn.record_write(page_id);
        Ok(())
    }

    /// Reads a page as visible to `txn`: its own staged writes first, then
    /// the committed overlay at its snapshot (or the live watermark, for
    /// `ReadCommitted`), then the on-disk image.
    pub fn read_page(&self, txn: &Transaction, page_id: PageId) -> Result<Vec<u8>> {
        let snapshot = match txn.isolation {
            Isolation::Snapshot => txn.snapshot_id,
            Isolation::ReadCommitted => self.committed_lsn(),
        };
        self.cache.read_page_for_txn(txn.id, page_id, snapshot)
    }

    fn release_locks(&self, txn_id: TxnId) {
        self.page_locks.lock().retain(|_, holder| *holder != txn_id);
    }

    /// Commit protocol (§4.D): append `Commit`, flush — the point past which
    /// the write is durable — advance the watermark, promote buffered pages,
    /// release locks.
    pub fn commit(&self, txn: &mut Transaction) -> Result<Lsn> {
        txn.check_active()?;
        let lsn = self.wal.append(WalRecord::Commit { txn_id: txn.id })?;
        self.wal.flush()?;
        self.committed_lsn.fetch_max(lsn, Ordering::AcqRel);
        self.cache.promote_commit(txn.id, lsn);
        self.release_locks(txn.id);
        self.active.lock().remove(&txn.id);
        txn.mark_committed();
        self.commits_since_checkpoint.fetch_add(1, Ordering::AcqRel);
        debug!("txn {} commit at lsn {lsn}", txn.id);
        Ok(lsn)
    }

    /// Abort protocol: append `Abort`, discard the buffered write-set,
    /// release locks. No flush is required for correctness — the pages were
    /// never promoted into the committed overlay.
    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        txn.check_active()?;
        self.wal.append(WalRecord::Abort { txn_id: txn.id })?;
        self.cache.discard(txn.id);
        self.release_locks(txn.id);
        self.active.lock().remove(&txn.id);
        txn.mark_aborted();
        debug!("txn {} abort", txn.id);
        Ok(())
    }

    /// Whether a checkpoint is due under the configured commit interval.
    #[must_use]
    pub fn checkpoint_due(&self, interval_commits: u64) -> bool {
        self.commits_since_checkpoint.load(Ordering::Acquire) >= interval_commits
    }

    /// Checkpoint: flush dirty pages to disk, fsync, append and flush a
    /// `Checkpoint` record, persist the watermark in the file header, then
    /// truncate the WAL (§4.D).
    pub fn checkpoint(&self) -> Result<()> {
        self.wal.flush()?;
        let flushed = self.cache.flush_dirty()?;
        self.disk.fsync()?;
        let lsn = self.committed_lsn();
        self.wal.append(WalRecord::Checkpoint { lsn })?;
        self.wal.flush()?;
        self.disk.set_last_checkpoint_lsn(lsn)?;
        self.wal.truncate()?;
        self.commits_since_checkpoint.store(0, Ordering::Release);
        info!("checkpoint at lsn {lsn}, {} pages flushed", flushed.len());
        Ok(())
    }
}
