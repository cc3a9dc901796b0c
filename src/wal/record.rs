//! WAL record payloads (§3 "WAL record", §4.C).

use serde::{Deserialize, Serialize};

use crate::types::{Lsn, PageId, TxnId};

/// One logical WAL record. The LSN is not stored inside the record itself;
/// it is assigned by the log on `append` and carried alongside it in
/// `Frame`, mirroring the teacher's length-prefixed bincode frame style
/// used for its own journal records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WalRecord {
    Begin { txn_id: TxnId },
    Write { txn_id: TxnId, page_id: PageId, before: Vec<u8>, after: Vec<u8> },
    Commit { txn_id: TxnId },
    Abort { txn_id: TxnId },
    Checkpoint { lsn: Lsn },
}

impl WalRecord {
    #[must_use]
    pub const fn txn_id(&self) -> Option<TxnId> {
        match self {
            WalRecord::Begin { txn_id }
            | WalRecord::Write { txn_id, .. }
            | WalRecord::Commit { txn_id }
            | WalRecord::Abort { txn_id } => Some(*txn_id),
            WalRecord::Checkpoint { .. } => None,
        }
    }
}

/// A WAL record together with the LSN assigned to it at append time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub lsn: Lsn,
    pub record: WalRecord,
}
