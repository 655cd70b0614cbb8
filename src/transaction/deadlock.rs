// Deadlock Detection
//
// Only direct two-party cycles are resolved. Longer wait-for cycles are
// reported by `find_cycle` for diagnostics but never broken.
use super::lock_table::LockTable;
use super::types::*;
use super::wait_queue::WaitQueue;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

/// How the victim of a two-party deadlock is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VictimPolicy {
    #[default]
    LowestId,
    HighestId,
    /// The participant whose blocked request appears earliest in the script.
    OldestRequest,
}

impl VictimPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VictimPolicy::LowestId => "lowest-id",
            VictimPolicy::HighestId => "highest-id",
            VictimPolicy::OldestRequest => "oldest-request",
        }
    }
}

impl FromStr for VictimPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lowest-id" | "lowest" => Ok(VictimPolicy::LowestId),
            "highest-id" | "highest" => Ok(VictimPolicy::HighestId),
            "oldest-request" | "oldest" => Ok(VictimPolicy::OldestRequest),
            _ => Err(Error::ConfigError(format!("Invalid victim policy: {}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deadlock {
    pub participants: (TransactionId, TransactionId),
    pub victim: TransactionId,
}

pub struct DeadlockDetector {
    policy: VictimPolicy,
}

impl DeadlockDetector {
    pub fn new(policy: VictimPolicy) -> Self {
        DeadlockDetector { policy }
    }

    /// True if the head request of `waiter` would be grantable once `holder`
    /// released its current locks.
    pub fn blocks(locks: &LockTable, waits: &WaitQueue, waiter: TransactionId, holder: TransactionId) -> bool {
        if waiter == holder {
            return false;
        }
        let Some(head) = waits.head(waiter) else {
            return false;
        };
        let Some(mode) = head.operation.command.lock_mode() else {
            return false;
        };
        let Some(holders) = locks.holders_of(&head.operation.variable) else {
            return false;
        };

        if holders.exclusive() == Some(holder) {
            return true;
        }
        // Only an exclusive request can be blocked by a reader
        mode == LockMode::Exclusive && holders.shared().contains(&holder)
    }

    /// Finds the first pair of waiting transactions blocking each other,
    /// scanning pairs in transaction id order.
    pub fn detect(&self, locks: &LockTable, waits: &WaitQueue) -> Option<Deadlock> {
        let waiting = waits.waiting_transactions();

        for (i, &first) in waiting.iter().enumerate() {
            for &second in &waiting[i + 1..] {
                if Self::blocks(locks, waits, first, second) && Self::blocks(locks, waits, second, first) {
                    return Some(Deadlock {
                        participants: (first, second),
                        victim: self.choose_victim(waits, first, second),
                    });
                }
            }
        }

        None
    }

    fn choose_victim(&self, waits: &WaitQueue, first: TransactionId, second: TransactionId) -> TransactionId {
        match self.policy {
            VictimPolicy::LowestId => first.min(second),
            VictimPolicy::HighestId => first.max(second),
            VictimPolicy::OldestRequest => {
                let arrival = |txn_id| waits.head(txn_id).map_or(usize::MAX, |p| p.index);
                // Ties fall back to the lower id
                if arrival(second) < arrival(first) {
                    second
                } else {
                    first
                }
            }
        }
    }

    /// Full wait-for relation between waiting transactions.
    pub fn wait_for_graph(locks: &LockTable, waits: &WaitQueue) -> BTreeMap<TransactionId, Vec<TransactionId>> {
        let waiting = waits.waiting_transactions();
        let mut graph = BTreeMap::new();

        for &waiter in &waiting {
            let edges: Vec<TransactionId> = waiting
                .iter()
                .copied()
                .filter(|&holder| Self::blocks(locks, waits, waiter, holder))
                .collect();
            if !edges.is_empty() {
                graph.insert(waiter, edges);
            }
        }

        graph
    }

    /// Any cycle in `graph`, as the list of transactions along it.
    pub fn find_cycle(graph: &BTreeMap<TransactionId, Vec<TransactionId>>) -> Option<Vec<TransactionId>> {
        let mut visited = HashSet::new();

        for &start in graph.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut rec_stack = Vec::new();
            if let Some(cycle) = Self::dfs(start, graph, &mut visited, &mut rec_stack) {
                return Some(cycle);
            }
        }

        None
    }

    fn dfs(
        node: TransactionId,
        graph: &BTreeMap<TransactionId, Vec<TransactionId>>,
        visited: &mut HashSet<TransactionId>,
        rec_stack: &mut Vec<TransactionId>,
    ) -> Option<Vec<TransactionId>> {
        visited.insert(node);
        rec_stack.push(node);

        if let Some(neighbors) = graph.get(&node) {
            for &neighbor in neighbors {
                if let Some(position) = rec_stack.iter().position(|&t| t == neighbor) {
                    return Some(rec_stack[position..].to_vec());
                }
                if !visited.contains(&neighbor) {
                    if let Some(cycle) = Self::dfs(neighbor, graph, visited, rec_stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        rec_stack.pop();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::wait_queue::PendingOperation;

    const T1: TransactionId = TransactionId(1);
    const T2: TransactionId = TransactionId(2);
    const T3: TransactionId = TransactionId(3);

    /// T1 holds A and waits for B, T2 holds B and waits for A.
    fn crossed_exclusive() -> (LockTable, WaitQueue) {
        let mut locks = LockTable::new();
        let mut waits = WaitQueue::new();
        locks.try_acquire_exclusive("A", T1);
        locks.try_acquire_exclusive("B", T2);
        waits.enqueue(PendingOperation::new(2, Operation::lock_exclusive(1, "B")));
        waits.enqueue(PendingOperation::new(3, Operation::lock_exclusive(2, "A")));
        (locks, waits)
    }

    #[test]
    fn test_blocks_on_exclusive_holder() {
        let (locks, waits) = crossed_exclusive();
        assert!(DeadlockDetector::blocks(&locks, &waits, T1, T2));
        assert!(DeadlockDetector::blocks(&locks, &waits, T2, T1));
        assert!(!DeadlockDetector::blocks(&locks, &waits, T1, T1));
        assert!(!DeadlockDetector::blocks(&locks, &waits, T3, T1));
    }

    #[test]
    fn test_shared_holder_blocks_only_exclusive_request() {
        let mut locks = LockTable::new();
        let mut waits = WaitQueue::new();
        locks.try_acquire_shared("A", T2);
        waits.enqueue(PendingOperation::new(0, Operation::lock_shared(1, "A")));
        waits.enqueue(PendingOperation::new(1, Operation::lock_exclusive(3, "A")));

        assert!(!DeadlockDetector::blocks(&locks, &waits, T1, T2));
        assert!(DeadlockDetector::blocks(&locks, &waits, T3, T2));
    }

    #[test]
    fn test_detect_victim_policies() {
        let (locks, waits) = crossed_exclusive();

        let lowest = DeadlockDetector::new(VictimPolicy::LowestId).detect(&locks, &waits).unwrap();
        assert_eq!(lowest.participants, (T1, T2));
        assert_eq!(lowest.victim, T1);

        let highest = DeadlockDetector::new(VictimPolicy::HighestId).detect(&locks, &waits).unwrap();
        assert_eq!(highest.victim, T2);

        let oldest = DeadlockDetector::new(VictimPolicy::OldestRequest).detect(&locks, &waits).unwrap();
        assert_eq!(oldest.victim, T1);
    }

    #[test]
    fn test_one_way_wait_is_not_deadlock() {
        let mut locks = LockTable::new();
        let mut waits = WaitQueue::new();
        locks.try_acquire_exclusive("A", T1);
        waits.enqueue(PendingOperation::new(1, Operation::lock_shared(2, "A")));

        let detector = DeadlockDetector::new(VictimPolicy::default());
        assert!(detector.detect(&locks, &waits).is_none());
    }

    #[test]
    fn test_three_party_cycle_is_only_diagnosed() {
        let mut locks = LockTable::new();
        let mut waits = WaitQueue::new();
        locks.try_acquire_exclusive("A", T1);
        locks.try_acquire_exclusive("B", T2);
        locks.try_acquire_exclusive("C", T3);
        waits.enqueue(PendingOperation::new(3, Operation::lock_exclusive(1, "B")));
        waits.enqueue(PendingOperation::new(4, Operation::lock_exclusive(2, "C")));
        waits.enqueue(PendingOperation::new(5, Operation::lock_exclusive(3, "A")));

        let detector = DeadlockDetector::new(VictimPolicy::default());
        assert!(detector.detect(&locks, &waits).is_none());

        let graph = DeadlockDetector::wait_for_graph(&locks, &waits);
        assert_eq!(graph.get(&T1), Some(&vec![T2]));
        assert_eq!(DeadlockDetector::find_cycle(&graph), Some(vec![T1, T2, T3]));
    }

    #[test]
    fn test_victim_policy_parsing() {
        assert_eq!("lowest-id".parse::<VictimPolicy>().unwrap(), VictimPolicy::LowestId);
        assert_eq!("HIGHEST".parse::<VictimPolicy>().unwrap(), VictimPolicy::HighestId);
        assert_eq!("oldest-request".parse::<VictimPolicy>().unwrap(), VictimPolicy::OldestRequest);
        assert!("random".parse::<VictimPolicy>().is_err());
    }
}
