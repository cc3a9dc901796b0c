//! In-memory transaction handle (§3 "Transaction", §4.D state machine).

use crate::errors::{DbError, Result};
use crate::types::{Isolation, Lsn, PageId, TxnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// A transaction handle. `Active -> Committed` or `Active -> Aborted` are the
/// only transitions; both are terminal, and any further operation on a
/// terminal transaction fails with `Finalised`.
#[derive(Debug)]
pub struct Transaction {
    pub id: TxnId,
    pub snapshot_id: Lsn,
    pub isolation: Isolation,
    state: TxnState,
    write_set: Vec<PageId>,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, snapshot_id: Lsn, isolation: Isolation) -> Self {
        Self { id, snapshot_id, isolation, state: TxnState::Active, write_set: Vec::new() }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    pub fn check_active(&self) -> Result<()> {
        if self.is_active() { Ok(()) } else { Err(DbError::Finalised) }
    }

    pub(crate) fn record_write(&mut self, page_id: PageId) {
        if !self.write_set.contains(&page_id) {
            self.write_set.push(page_id);
        }
    }

    #[must_use]
    pub fn write_set(&self) -> &[PageId] {
        &self.write_set
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TxnState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TxnState::Aborted;
    }
}
