// Lock Table: per-variable shared/exclusive holders
use super::types::*;
use ahash::AHashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    NotHeld,
}

/// Holders of one variable. An exclusive holder excludes every shared holder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HolderSet {
    shared: BTreeSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl HolderSet {
    pub fn shared(&self) -> &BTreeSet<TransactionId> {
        &self.shared
    }

    pub fn exclusive(&self) -> Option<TransactionId> {
        self.exclusive
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }

    /// Mode in which `txn_id` holds this variable, if any.
    pub fn mode_of(&self, txn_id: TransactionId) -> Option<LockMode> {
        if self.exclusive == Some(txn_id) {
            Some(LockMode::Exclusive)
        } else if self.shared.contains(&txn_id) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// Holders other than `txn_id`, with the mode each holds.
    fn others(&self, txn_id: TransactionId) -> impl Iterator<Item = (TransactionId, LockMode)> + '_ {
        self.exclusive
            .iter()
            .map(|&t| (t, LockMode::Exclusive))
            .chain(self.shared.iter().map(|&t| (t, LockMode::Shared)))
            .filter(move |(t, _)| *t != txn_id)
    }

    fn remove(&mut self, txn_id: TransactionId) -> Release {
        if self.exclusive == Some(txn_id) {
            self.exclusive = None;
            Release::Released
        } else if self.shared.remove(&txn_id) {
            Release::Released
        } else {
            Release::NotHeld
        }
    }
}

#[derive(Debug, Default)]
pub struct LockTable {
    // Entries exist only while they have at least one holder
    entries: AHashMap<String, HolderSet>,
}

impl LockTable {
    pub fn new() -> Self {
        LockTable {
            entries: AHashMap::new(),
        }
    }

    pub fn try_acquire(&mut self, variable: &str, txn_id: TransactionId, mode: LockMode) -> Acquire {
        if let Some(entry) = self.entries.get(variable) {
            // Already held in a mode at least as strong as requested
            match (entry.mode_of(txn_id), mode) {
                (Some(LockMode::Exclusive), _) | (Some(LockMode::Shared), LockMode::Shared) => {
                    return Acquire::Granted;
                }
                _ => {}
            }

            let compatible = entry.others(txn_id).all(|(_, held)| mode.is_compatible(&held));
            if !compatible {
                return Acquire::Blocked;
            }
        }

        let entry = self.entries.entry(variable.to_string()).or_default();
        match mode {
            LockMode::Shared => {
                entry.shared.insert(txn_id);
            }
            LockMode::Exclusive => {
                // Upgrade drops the shared hold in the same step
                entry.shared.remove(&txn_id);
                entry.exclusive = Some(txn_id);
            }
        }
        Acquire::Granted
    }

    pub fn try_acquire_shared(&mut self, variable: &str, txn_id: TransactionId) -> Acquire {
        self.try_acquire(variable, txn_id, LockMode::Shared)
    }

    pub fn try_acquire_exclusive(&mut self, variable: &str, txn_id: TransactionId) -> Acquire {
        self.try_acquire(variable, txn_id, LockMode::Exclusive)
    }

    pub fn release(&mut self, variable: &str, txn_id: TransactionId) -> Release {
        let Some(entry) = self.entries.get_mut(variable) else {
            return Release::NotHeld;
        };

        let released = entry.remove(txn_id);
        if entry.is_empty() {
            self.entries.remove(variable);
        }
        released
    }

    /// Drops every hold of `txn_id`. Returns the released variables, sorted.
    pub fn release_all(&mut self, txn_id: TransactionId) -> Vec<String> {
        let mut released = Vec::new();
        self.entries.retain(|variable, entry| {
            if entry.remove(txn_id) == Release::Released {
                released.push(variable.clone());
            }
            !entry.is_empty()
        });
        released.sort();
        released
    }

    pub fn holders_of(&self, variable: &str) -> Option<&HolderSet> {
        self.entries.get(variable)
    }

    pub fn is_held_exclusively_by(&self, variable: &str, txn_id: TransactionId) -> bool {
        self.holders_of(variable)
            .map_or(false, |entry| entry.exclusive == Some(txn_id))
    }

    /// True if `txn_id` holds `variable` in either mode.
    pub fn is_held_by(&self, variable: &str, txn_id: TransactionId) -> bool {
        self.holders_of(variable)
            .map_or(false, |entry| entry.mode_of(txn_id).is_some())
    }

    /// True if `txn_id` appears as a holder of any variable.
    pub fn holds_any(&self, txn_id: TransactionId) -> bool {
        self.entries.values().any(|entry| entry.mode_of(txn_id).is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HolderSet)> {
        self.entries.iter().map(|(variable, entry)| (variable.as_str(), entry))
    }

    /// Ordered copy of the table, for reports.
    pub fn snapshot(&self) -> BTreeMap<String, HolderSet> {
        self.entries
            .iter()
            .map(|(variable, entry)| (variable.clone(), entry.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TransactionId = TransactionId(1);
    const T2: TransactionId = TransactionId(2);
    const T3: TransactionId = TransactionId(3);

    #[test]
    fn test_shared_locks_coexist() {
        let mut table = LockTable::new();
        assert_eq!(table.try_acquire_shared("A", T1), Acquire::Granted);
        assert_eq!(table.try_acquire_shared("A", T2), Acquire::Granted);

        let holders = table.holders_of("A").unwrap();
        assert_eq!(holders.shared().len(), 2);
        assert_eq!(holders.exclusive(), None);
    }

    #[test]
    fn test_exclusive_blocks_everyone_else() {
        let mut table = LockTable::new();
        assert_eq!(table.try_acquire_exclusive("A", T1), Acquire::Granted);
        assert_eq!(table.try_acquire_shared("A", T2), Acquire::Blocked);
        assert_eq!(table.try_acquire_exclusive("A", T2), Acquire::Blocked);
        assert!(table.is_held_exclusively_by("A", T1));
        assert!(!table.is_held_by("A", T2));
    }

    #[test]
    fn test_shared_blocks_exclusive_of_other() {
        let mut table = LockTable::new();
        table.try_acquire_shared("A", T1);
        assert_eq!(table.try_acquire_exclusive("A", T2), Acquire::Blocked);
        assert_eq!(table.holders_of("A").unwrap().exclusive(), None);
    }

    #[test]
    fn test_upgrade_replaces_shared_hold() {
        let mut table = LockTable::new();
        table.try_acquire_shared("A", T1);
        assert_eq!(table.try_acquire_exclusive("A", T1), Acquire::Granted);

        let holders = table.holders_of("A").unwrap();
        assert_eq!(holders.exclusive(), Some(T1));
        assert!(holders.shared().is_empty());
    }

    #[test]
    fn test_upgrade_blocked_by_other_reader() {
        let mut table = LockTable::new();
        table.try_acquire_shared("A", T1);
        table.try_acquire_shared("A", T2);
        assert_eq!(table.try_acquire_exclusive("A", T1), Acquire::Blocked);
        assert_eq!(table.holders_of("A").unwrap().mode_of(T1), Some(LockMode::Shared));
    }

    #[test]
    fn test_shared_request_by_exclusive_holder_is_noop() {
        let mut table = LockTable::new();
        table.try_acquire_exclusive("A", T1);
        assert_eq!(table.try_acquire_shared("A", T1), Acquire::Granted);

        let holders = table.holders_of("A").unwrap();
        assert_eq!(holders.exclusive(), Some(T1));
        assert!(holders.shared().is_empty());
    }

    #[test]
    fn test_release_removes_empty_entries() {
        let mut table = LockTable::new();
        table.try_acquire_exclusive("A", T1);
        assert_eq!(table.release("A", T1), Release::Released);
        assert!(table.is_empty());
        assert_eq!(table.release("A", T1), Release::NotHeld);
        assert_eq!(table.release("B", T1), Release::NotHeld);
    }

    #[test]
    fn test_release_keeps_other_readers() {
        let mut table = LockTable::new();
        table.try_acquire_shared("A", T1);
        table.try_acquire_shared("A", T2);
        assert_eq!(table.release("A", T1), Release::Released);
        assert_eq!(table.len(), 1);
        assert!(table.is_held_by("A", T2));
    }

    #[test]
    fn test_release_all() {
        let mut table = LockTable::new();
        table.try_acquire_exclusive("B", T1);
        table.try_acquire_shared("A", T1);
        table.try_acquire_shared("A", T2);
        table.try_acquire_exclusive("C", T3);

        assert_eq!(table.release_all(T1), vec!["A".to_string(), "B".to_string()]);
        assert!(!table.holds_any(T1));
        assert!(table.is_held_by("A", T2));
        assert!(table.is_held_exclusively_by("C", T3));
        assert_eq!(table.len(), 2);
    }
}
