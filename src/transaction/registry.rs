// Transaction Registry: two-phase bookkeeping per transaction
use super::types::*;
use serde::Serialize;
use std::collections::BTreeSet;

/// Where a transaction stands under strict two-phase locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionPhase {
    /// May still acquire locks.
    Growing,
    /// Has released a lock; any further lock request is a violation.
    Shrinking,
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionRegistry {
    unlocked: BTreeSet<TransactionId>,
    aborted: BTreeSet<TransactionId>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `txn_id` is recorded.
    pub fn mark_unlocked(&mut self, txn_id: TransactionId) -> bool {
        self.unlocked.insert(txn_id)
    }

    pub fn has_unlocked(&self, txn_id: TransactionId) -> bool {
        self.unlocked.contains(&txn_id)
    }

    /// Returns true the first time `txn_id` is recorded.
    pub fn mark_aborted(&mut self, txn_id: TransactionId) -> bool {
        self.aborted.insert(txn_id)
    }

    pub fn is_aborted(&self, txn_id: TransactionId) -> bool {
        self.aborted.contains(&txn_id)
    }

    pub fn aborted(&self) -> &BTreeSet<TransactionId> {
        &self.aborted
    }

    pub fn phase(&self, txn_id: TransactionId) -> TransactionPhase {
        if self.is_aborted(txn_id) {
            TransactionPhase::Aborted
        } else if self.has_unlocked(txn_id) {
            TransactionPhase::Shrinking
        } else {
            TransactionPhase::Growing
        }
    }
}
