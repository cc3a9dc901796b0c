//! Generic chained-page blob store, used to persist the catalog and the
//! key-dictionary (§4.H): "an append-only chain of pages holding ... pairs".
//! Rather than patching a chain in place, every write frees the old chain
//! and lays down a fresh one sized to the new blob — simple to reason about
//! for crash safety, since each page in the new chain is an ordinary
//! WAL-protected `Write` within the same transaction as the logical change
//! that produced the blob.
//!
//! Per-page body layout, after the 32-byte page header:
//! `[ chunk_len: u32_le ][ chunk bytes ][ next_page: u32_le ]`.

use crate::errors::Result;
use crate::page::header::{PAGE_HEADER_LEN, PageHeader, PageType, write_checksum};
use crate::page::PageFile;
use crate::txn::{Transaction, TransactionManager};
use crate::types::PageId;

const NONE_PAGE: PageId = 0;
const CHUNK_OVERHEAD: usize = 4 + 4;

fn chunk_capacity(page_size: usize) -> usize {
    page_size - PAGE_HEADER_LEN - CHUNK_OVERHEAD
}

/// Reads and concatenates every chunk in the chain starting at `head`.
/// Returns an empty vec if `head == 0` (no chain persisted yet).
pub fn read_chain(mgr: &TransactionManager, txn: &Transaction, head: PageId) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut page_id = head;
    while page_id != NONE_PAGE {
        let buf = mgr.read_page(txn, page_id)?;
        let at = PAGE_HEADER_LEN;
        let chunk_len = u32::from_le_bytes(buf[at..at + 4].try_into().unwrap()) as usize;
        let chunk_start = at + 4;
        out.extend_from_slice(&buf[chunk_start..chunk_start + chunk_len]);
        let next_at = chunk_start + chunk_len;
        page_id = u32::from_le_bytes(buf[next_at..next_at + 4].try_into().unwrap());
    }
    Ok(out)
}

/// Frees the chain at `old_head` (if any) and writes `data` as a fresh
/// chain, returning the new head page id (0 if `data` is empty).
pub fn write_chain(
    disk: &PageFile,
    mgr: &TransactionManager,
    txn: &mut Transaction,
    old_head: PageId,
    page_type: PageType,
    data: &[u8],
) -> Result<PageId> {
    free_chain(mgr, txn, disk, old_head)?;
    if data.is_empty() {
        return Ok(NONE_PAGE);
    }

    let page_size = disk.page_size() as usize;
    let capacity = chunk_capacity(page_size);
    let chunks: Vec<&[u8]> = data.chunks(capacity).collect();

    let mut page_ids = Vec::with_capacity(chunks.len());
    for _ in &chunks {
        page_ids.push(disk.allocate_page(page_type)?);
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let page_id = page_ids[i];
        let next = page_ids.get(i + 1).copied().unwrap_or(NONE_PAGE);
        let before = mgr.read_page(txn, page_id)?;
        let mut after = vec![0u8; page_size];
        PageHeader::new(page_type, page_id).write_into(&mut after);
        let at = PAGE_HEADER_LEN;
        after[at..at + 4].copy_from_slice(&(chunk.len() as u32).to_le_bytes());
        after[at + 4..at + 4 + chunk.len()].copy_from_slice(chunk);
        after[at + 4 + chunk.len()..at + 8 + chunk.len()].copy_from_slice(&next.to_le_bytes());
        write_checksum(&mut after);
        mgr.stage_write(txn, page_id, before, after)?;
    }

    Ok(page_ids[0])
}

fn free_chain(mgr: &TransactionManager, txn: &Transaction, disk: &PageFile, head: PageId) -> Result<()> {
    let mut page_id = head;
    while page_id != NONE_PAGE {
        let buf = mgr.read_page(txn, page_id)?;
        let at = PAGE_HEADER_LEN;
        let chunk_len = u32::from_le_bytes(buf[at..at + 4].try_into().unwrap()) as usize;
        let next_at = at + 4 + chunk_len;
        let next = u32::from_le_bytes(buf[next_at..next_at + 4].try_into().unwrap());
        disk.free_page(page_id)?;
        page_id = next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, PageCache};
    use crate::types::Isolation;
    use crate::wal::WriteAheadLog;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn chain_round_trips_across_multiple_pages() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(PageFile::create(dir.path().join("db.blite"), 128).unwrap());
        let cache = Arc::new(PageCache::new(disk.clone(), CacheConfig { capacity: 64 }));
        let wal = Arc::new(WriteAheadLog::open(dir.path().join("db.wal")).unwrap());
        let mgr = TransactionManager::new(wal, cache, disk.clone(), 0);
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();

        let data = vec![0x5Au8; 500];
        let head = write_chain(&disk, &mgr, &mut txn, 0, PageType::Catalog, &data).unwrap();
        let read_back = read_chain(&mgr, &txn, head).unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn rewrite_frees_old_chain() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(PageFile::create(dir.path().join("db.blite"), 128).unwrap());
        let cache = Arc::new(PageCache::new(disk.clone(), CacheConfig { capacity: 64 }));
        let wal = Arc::new(WriteAheadLog::open(dir.path().join("db.wal")).unwrap());
        let mgr = TransactionManager::new(wal, cache, disk.clone(), 0);
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();

        let head = write_chain(&disk, &mgr, &mut txn, 0, PageType::Catalog, &vec![1u8; 300]).unwrap();
        let count_before = disk.page_count();
        let _head2 = write_chain(&disk, &mgr, &mut txn, head, PageType::Catalog, &vec![2u8; 10]).unwrap();
        let count_after = disk.page_count();
        assert_eq!(count_before, count_after, "freed pages should be reused, not grow the file");
    }
}
