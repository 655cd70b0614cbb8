// Wait Queue: per-transaction FIFO of deferred operations
use super::types::*;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// A deferred operation together with its position in the input script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingOperation {
    pub index: usize,
    pub operation: Operation,
}

impl PendingOperation {
    pub fn new(index: usize, operation: Operation) -> Self {
        PendingOperation { index, operation }
    }

    pub fn transaction(&self) -> TransactionId {
        self.operation.transaction
    }
}

#[derive(Debug, Default)]
pub struct WaitQueue {
    // Ordered by transaction id so retries and detection are deterministic.
    // A queue that becomes empty is removed.
    queues: BTreeMap<TransactionId, VecDeque<PendingOperation>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, pending: PendingOperation) {
        self.queues
            .entry(pending.transaction())
            .or_default()
            .push_back(pending);
    }

    /// True if `txn_id` has a pending lock request.
    pub fn is_waiting(&self, txn_id: TransactionId) -> bool {
        self.queues.get(&txn_id).map_or(false, |queue| {
            queue.iter().any(|p| p.operation.command.is_lock_request())
        })
    }

    pub fn has_pending(&self, txn_id: TransactionId) -> bool {
        self.queues.contains_key(&txn_id)
    }

    pub fn head(&self, txn_id: TransactionId) -> Option<&PendingOperation> {
        self.queues.get(&txn_id).and_then(|queue| queue.front())
    }

    /// Removes the pending operation that came from script position `index`.
    pub fn dequeue(&mut self, txn_id: TransactionId, index: usize) -> Option<PendingOperation> {
        let queue = self.queues.get_mut(&txn_id)?;
        let position = queue.iter().position(|p| p.index == index)?;
        let pending = queue.remove(position);
        if queue.is_empty() {
            self.queues.remove(&txn_id);
        }
        pending
    }

    pub fn drain(&mut self, txn_id: TransactionId) -> Vec<PendingOperation> {
        self.queues
            .remove(&txn_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn for_each_pending<F>(&self, mut f: F)
    where
        F: FnMut(TransactionId, &PendingOperation),
    {
        for (&txn_id, queue) in &self.queues {
            for pending in queue {
                f(txn_id, pending);
            }
        }
    }

    /// Transactions with pending work, in id order.
    pub fn transactions(&self) -> Vec<TransactionId> {
        self.queues.keys().copied().collect()
    }

    /// Transactions with at least one pending lock request, in id order.
    pub fn waiting_transactions(&self) -> Vec<TransactionId> {
        self.queues
            .keys()
            .copied()
            .filter(|&txn_id| self.is_waiting(txn_id))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Total number of pending operations.
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(index: usize, op: Operation) -> PendingOperation {
        PendingOperation::new(index, op)
    }

    #[test]
    fn test_enqueue_preserves_order() {
        let mut queue = WaitQueue::new();
        queue.enqueue(pending(1, Operation::lock_exclusive(2, "A")));
        queue.enqueue(pending(4, Operation::write(2, "A")));
        queue.enqueue(pending(5, Operation::unlock(2, "A")));

        let mut seen = Vec::new();
        queue.for_each_pending(|txn, p| seen.push((txn, p.index)));
        assert_eq!(seen, vec![(TransactionId(2), 1), (TransactionId(2), 4), (TransactionId(2), 5)]);
        assert_eq!(queue.head(TransactionId(2)).unwrap().index, 1);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_waiting_requires_lock_request() {
        let mut queue = WaitQueue::new();
        queue.enqueue(pending(0, Operation::read(1, "A")));
        assert!(queue.has_pending(TransactionId(1)));
        assert!(!queue.is_waiting(TransactionId(1)));
        assert!(queue.waiting_transactions().is_empty());

        queue.enqueue(pending(1, Operation::lock_shared(1, "B")));
        assert!(queue.is_waiting(TransactionId(1)));
        assert_eq!(queue.waiting_transactions(), vec![TransactionId(1)]);
    }

    #[test]
    fn test_dequeue_specific_entry() {
        let mut queue = WaitQueue::new();
        queue.enqueue(pending(2, Operation::lock_exclusive(3, "A")));
        queue.enqueue(pending(6, Operation::write(3, "A")));

        let removed = queue.dequeue(TransactionId(3), 6).unwrap();
        assert_eq!(removed.operation, Operation::write(3, "A"));
        assert!(queue.dequeue(TransactionId(3), 6).is_none());

        queue.dequeue(TransactionId(3), 2);
        assert!(!queue.has_pending(TransactionId(3)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain() {
        let mut queue = WaitQueue::new();
        queue.enqueue(pending(0, Operation::lock_exclusive(1, "A")));
        queue.enqueue(pending(1, Operation::lock_exclusive(2, "B")));
        queue.enqueue(pending(2, Operation::unlock(1, "A")));

        let drained = queue.drain(TransactionId(1));
        assert_eq!(drained.iter().map(|p| p.index).collect::<Vec<_>>(), vec![0, 2]);
        assert!(queue.drain(TransactionId(1)).is_empty());
        assert_eq!(queue.transactions(), vec![TransactionId(2)]);
    }
}
