// Run Report: per-operation outcomes, trace, and terminal check result
use super::deadlock::Deadlock;
use super::lock_table::HolderSet;
use super::registry::TransactionPhase;
use super::types::*;
use super::wait_queue::PendingOperation;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Final state of one input operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    pub operation: Operation,
    pub outcome: Outcome,
    /// Whether the operation spent at least one round in the wait queue.
    pub waited: bool,
    pub violation: Option<Violation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TraceEvent {
    Operation {
        round: usize,
        index: usize,
        operation: Operation,
        outcome: Outcome,
        /// Evaluated from the wait queue rather than on arrival.
        resumed: bool,
        violation: Option<Violation>,
    },
    Deadlock {
        round: usize,
        deadlock: Deadlock,
    },
    Abort {
        round: usize,
        transaction: TransactionId,
        released: Vec<String>,
    },
}

/// Fixed point reached with work still queued and no two-party deadlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stall {
    pub waiting: Vec<TransactionId>,
    /// A longer wait-for cycle, if one explains the stall.
    pub cycle: Option<Vec<TransactionId>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub operations: Vec<OperationReport>,
    pub trace: Vec<TraceEvent>,
    pub deadlocks: Vec<Deadlock>,
    pub aborted: BTreeSet<TransactionId>,
    pub transactions: BTreeMap<TransactionId, TransactionPhase>,
    pub rounds: usize,
    pub clean_finish: bool,
    pub residual_locks: BTreeMap<String, HolderSet>,
    pub residual_waits: Vec<PendingOperation>,
    pub stall: Option<Stall>,
}

impl RunReport {
    pub fn outcome(&self, index: usize) -> Option<Outcome> {
        self.operations.get(index).map(|op| op.outcome)
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.operations.iter().map(|op| op.outcome).collect()
    }

    pub fn is_aborted(&self, txn_id: TransactionId) -> bool {
        self.aborted.contains(&txn_id)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.operations.iter().filter(|op| op.outcome == outcome).count()
    }

    /// Surfaces a failed terminal check as a hard error.
    pub fn ensure_clean(&self) -> Result<()> {
        if self.clean_finish {
            return Ok(());
        }

        let mut message = format!(
            "{} variable(s) still locked, {} operation(s) still pending",
            self.residual_locks.len(),
            self.residual_waits.len()
        );
        if let Some(stall) = &self.stall {
            message.push_str(&format!("; stalled transactions: {}", join_ids(&stall.waiting)));
        }
        Err(Error::InternalInconsistency(message))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::SerializationError(e.to_string()))
    }
}

fn join_ids(ids: &[TransactionId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Operation {
                round,
                operation,
                outcome,
                resumed,
                violation,
                ..
            } => {
                let tag = if *resumed { "RETRY" } else { "EXEC" };
                write!(f, "[{:>4}] {:<5} {} -> {}", round, tag, operation, outcome)?;
                if let Some(violation) = violation {
                    write!(f, " ({})", violation)?;
                }
                Ok(())
            }
            TraceEvent::Deadlock { round, deadlock } => write!(
                f,
                "[{:>4}] DEADLOCK between {} and {}, victim {}",
                round, deadlock.participants.0, deadlock.participants.1, deadlock.victim
            ),
            TraceEvent::Abort {
                round,
                transaction,
                released,
            } => write!(
                f,
                "[{:>4}] ABORT {} (released: {})",
                round,
                transaction,
                if released.is_empty() { "-".to_string() } else { released.join(", ") }
            ),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for event in &self.trace {
            writeln!(f, "{}", event)?;
        }

        writeln!(f, "operations: {}", self.operations.len())?;
        for outcome in [
            Outcome::Ok,
            Outcome::Wait,
            Outcome::ProtocolViolation,
            Outcome::DeadlockAborted,
            Outcome::Skipped,
            Outcome::Discarded,
        ] {
            let count = self.count(outcome);
            if count > 0 {
                writeln!(f, "  {}: {}", outcome, count)?;
            }
        }

        let aborted: Vec<TransactionId> = self.aborted.iter().copied().collect();
        writeln!(f, "aborted: {}", if aborted.is_empty() { "-".to_string() } else { join_ids(&aborted) })?;
        writeln!(f, "deadlocks: {}", self.deadlocks.len())?;
        writeln!(f, "rounds: {}", self.rounds)?;

        if self.clean_finish {
            write!(f, "finish: clean")
        } else {
            writeln!(f, "finish: ERROR")?;
            for (variable, holders) in &self.residual_locks {
                let mut owners: Vec<String> = holders.shared().iter().map(|t| format!("{} (S)", t)).collect();
                if let Some(t) = holders.exclusive() {
                    owners.push(format!("{} (X)", t));
                }
                writeln!(f, "  locked {}: {}", variable, owners.join(", "))?;
            }
            for pending in &self.residual_waits {
                writeln!(f, "  pending {}", pending.operation)?;
            }
            if let Some(cycle) = self.stall.as_ref().and_then(|s| s.cycle.as_ref()) {
                writeln!(f, "  unresolved wait-for cycle: {}", join_ids(cycle))?;
            }
            Ok(())
        }
    }
}
