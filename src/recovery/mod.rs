//! Crash recovery (§4.D "Recovery protocol"): REDO committed writes, UNDO
//! uncommitted ones, then truncate the log. Runs once, synchronously, at
//! `open`, before the transaction manager accepts new transactions.

use std::collections::HashSet;

use log::{info, warn};

use crate::errors::Result;
use crate::page::PageFile;
use crate::types::{Lsn, TxnId};
use crate::wal::{Frame, WalRecord, WriteAheadLog};

/// Replays the WAL against the page file and returns the recovered
/// committed-LSN watermark (the highest `Commit` LSN observed, or the prior
/// checkpoint's LSN if none). The WAL is truncated afterward: every
/// durable effect it recorded has now been folded into the page file.
pub fn recover(wal: &WriteAheadLog, disk: &PageFile) -> Result<Lsn> {
    let from = disk.last_checkpoint_lsn();
    let frames = wal.iter_from(from)?;
    if frames.is_empty() {
        return Ok(from);
    }

    let committed = committed_txn_ids(&frames);
    let mut watermark = from;

    for frame in &frames {
        if let WalRecord::Commit { txn_id } = &frame.record {
            if committed.contains(txn_id) {
                watermark = watermark.max(frame.lsn);
            }
        }
    }

    let mut redo_count = 0u64;
    for frame in &frames {
        if let WalRecord::Write { txn_id, page_id, after, .. } = &frame.record {
            if committed.contains(txn_id) {
                let mut buf = after.clone();
                disk.write_page(*page_id, &mut buf)?;
                redo_count += 1;
            }
        }
    }

    let mut undo_count = 0u64;
    for frame in frames.iter().rev() {
        if let WalRecord::Write { txn_id, page_id, before, .. } = &frame.record {
            if !committed.contains(txn_id) {
                let mut buf = before.clone();
                disk.write_page(*page_id, &mut buf)?;
                undo_count += 1;
            }
        }
    }

    disk.fsync()?;
    wal.truncate()?;

    if redo_count > 0 || undo_count > 0 {
        info!("recovery: redo={redo_count} undo={undo_count} watermark={watermark}");
    } else {
        warn!("recovery: wal had {} frames but none applied", frames.len());
    }

    Ok(watermark)
}

/// A transaction is committed iff a `Commit` frame for it exists in the
/// scanned range. Everything else — explicit `Abort`, or a `Begin` with no
/// terminal record because the process died mid-transaction — is undone.
fn committed_txn_ids(frames: &[Frame]) -> HashSet<TxnId> {
    frames
        .iter()
        .filter_map(|f| match &f.record {
            WalRecord::Commit { txn_id } => Some(*txn_id),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageType;
    use tempfile::tempdir;

    #[test]
    fn redoes_committed_writes() {
        let dir = tempdir().unwrap();
        let disk = PageFile::create(dir.path().join("db.blite"), 512).unwrap();
        let page_id = disk.allocate_page(PageType::Data).unwrap();
        let wal = WriteAheadLog::open(dir.path().join("db.wal")).unwrap();

        let before = disk.read_page(page_id).unwrap();
        let mut after = before.clone();
        after[40] = 0xAB;

        wal.append(WalRecord::Begin { txn_id: 1 }).unwrap();
        wal.append(WalRecord::Write { txn_id: 1, page_id, before: before.clone(), after: after.clone() })
            .unwrap();
        wal.append(WalRecord::Commit { txn_id: 1 }).unwrap();
        wal.flush().unwrap();

        recover(&wal, &disk).unwrap();
        assert_eq!(disk.read_page(page_id).unwrap(), after);
    }

    #[test]
    fn undoes_uncommitted_writes() {
        let dir = tempdir().unwrap();
        let disk = PageFile::create(dir.path().join("db.blite"), 512).unwrap();
        let page_id = disk.allocate_page(PageType::Data).unwrap();
        let wal = WriteAheadLog::open(dir.path().join("db.wal")).unwrap();

        let before = disk.read_page(page_id).unwrap();
        let mut after = before.clone();
        after[40] = 0xAB;

        wal.append(WalRecord::Begin { txn_id: 1 }).unwrap();
        wal.append(WalRecord::Write { txn_id: 1, page_id, before: before.clone(), after }).unwrap();
        // No Commit: simulates a crash before the commit record was written.
        wal.flush().unwrap();

        recover(&wal, &disk).unwrap();
        assert_eq!(disk.read_page(page_id).unwrap(), before);
    }
}
