// Strict Two-Phase Locking Scheduler
//
// Drives one script through the lock table in rounds. Each round retries the
// wait queue, admits the next input operation, then looks for a two-party
// deadlock.
use super::deadlock::{Deadlock, DeadlockDetector};
use super::lock_table::{Acquire, LockTable, Release};
use super::registry::TransactionRegistry;
use super::report::{OperationReport, RunReport, Stall, TraceEvent};
use super::types::*;
use super::wait_queue::{PendingOperation, WaitQueue};
use crate::config::SchedulerConfig;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Input operations remain.
    Running,
    /// Input consumed, wait queue not yet empty.
    Draining,
    Done,
}

enum Admission {
    Ok,
    Wait,
    Violation(Violation),
}

/// All mutable state of a run. Owned by exactly one scheduler.
#[derive(Debug, Default)]
pub struct SchedulerState {
    locks: LockTable,
    registry: TransactionRegistry,
    waits: WaitQueue,
}

impl SchedulerState {
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    pub fn waits(&self) -> &WaitQueue {
        &self.waits
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    detector: DeadlockDetector,
    state: SchedulerState,
    reports: Vec<OperationReport>,
    cursor: usize,
    phase: RunPhase,
    round: usize,
    trace: Vec<TraceEvent>,
    deadlocks: Vec<Deadlock>,
    stall: Option<Stall>,
}

impl Scheduler {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self::with_config(operations, SchedulerConfig::default())
    }

    pub fn with_config(operations: Vec<Operation>, config: SchedulerConfig) -> Self {
        let reports = operations
            .into_iter()
            .map(|operation| OperationReport {
                operation,
                outcome: Outcome::Wait,
                waited: false,
                violation: None,
            })
            .collect();

        Scheduler {
            detector: DeadlockDetector::new(config.victim_policy),
            config,
            state: SchedulerState::default(),
            reports,
            cursor: 0,
            phase: RunPhase::Running,
            round: 0,
            trace: Vec::new(),
            deadlocks: Vec::new(),
            stall: None,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn round(&self) -> usize {
        self.round
    }

    /// Executes one scheduling round and returns the phase after it.
    pub fn step(&mut self) -> RunPhase {
        if self.phase == RunPhase::Done {
            return RunPhase::Done;
        }

        self.round += 1;
        debug!(round = self.round, cursor = self.cursor, "scheduling round");

        let mut progressed = self.retry_waiting();

        if self.cursor < self.reports.len() {
            self.advance();
            progressed = true;
        }

        if let Some(deadlock) = self.detector.detect(&self.state.locks, &self.state.waits) {
            self.resolve_deadlock(deadlock);
            progressed = true;
        }

        if self.cursor >= self.reports.len() {
            if self.state.waits.is_empty() {
                self.phase = RunPhase::Done;
            } else if !progressed {
                self.record_stall();
                self.phase = RunPhase::Done;
            } else {
                self.phase = RunPhase::Draining;
            }
        }

        self.phase
    }

    pub fn run_to_completion(mut self) -> RunReport {
        while self.step() != RunPhase::Done {}
        self.into_report()
    }

    /// Retries queued operations of every transaction from the head of its
    /// queue, stopping at the first one that still has to wait.
    fn retry_waiting(&mut self) -> bool {
        let mut progressed = false;

        for txn_id in self.state.waits.transactions() {
            loop {
                let state = &mut self.state;
                let Some(head) = state.waits.head(txn_id) else {
                    break;
                };
                let index = head.index;
                let admission = admit(&mut state.locks, &mut state.registry, &head.operation);

                match admission {
                    Admission::Ok => {
                        self.state.waits.dequeue(txn_id, index);
                        self.record(index, Outcome::Ok, true, None);
                        progressed = true;
                    }
                    Admission::Wait => break,
                    Admission::Violation(violation) => {
                        self.state.waits.dequeue(txn_id, index);
                        self.record(index, Outcome::ProtocolViolation, true, Some(violation));
                        self.abort(txn_id);
                        progressed = true;
                        break;
                    }
                }
            }
        }

        progressed
    }

    /// Evaluates the next input operation.
    fn advance(&mut self) {
        let index = self.cursor;
        self.cursor += 1;
        let operation = self.reports[index].operation.clone();
        let txn_id = operation.transaction;

        if self.state.registry.is_aborted(txn_id) {
            self.record(index, Outcome::Skipped, false, None);
            return;
        }

        // Nothing runs ahead of the transaction's own queued work
        if self.state.waits.has_pending(txn_id) {
            self.state.waits.enqueue(PendingOperation::new(index, operation));
            self.record(index, Outcome::Wait, false, None);
            return;
        }

        match admit(&mut self.state.locks, &mut self.state.registry, &operation) {
            Admission::Ok => self.record(index, Outcome::Ok, false, None),
            Admission::Wait => {
                self.state.waits.enqueue(PendingOperation::new(index, operation));
                self.record(index, Outcome::Wait, false, None);
            }
            Admission::Violation(violation) => {
                self.record(index, Outcome::ProtocolViolation, false, Some(violation));
                self.abort(txn_id);
            }
        }
    }

    fn resolve_deadlock(&mut self, deadlock: Deadlock) {
        let victim = deadlock.victim;
        warn!(
            round = self.round,
            first = %deadlock.participants.0,
            second = %deadlock.participants.1,
            victim = %victim,
            "deadlock detected"
        );

        if self.config.record_trace {
            self.trace.push(TraceEvent::Deadlock {
                round: self.round,
                deadlock: deadlock.clone(),
            });
        }
        self.deadlocks.push(deadlock);

        if let Some(head) = self.state.waits.head(victim) {
            let index = head.index;
            self.state.waits.dequeue(victim, index);
            self.record(index, Outcome::DeadlockAborted, true, None);
        }
        self.abort(victim);
    }

    /// Terminal cleanup for `txn_id`: marks it aborted, releases every lock it
    /// holds regardless of its queued work, and discards that work.
    fn abort(&mut self, txn_id: TransactionId) {
        self.state.registry.mark_aborted(txn_id);
        let released = self.state.locks.release_all(txn_id);

        for pending in self.state.waits.drain(txn_id) {
            self.record(pending.index, Outcome::Discarded, true, None);
        }

        warn!(round = self.round, txn = %txn_id, released = ?released, "aborting transaction");
        if self.config.record_trace {
            self.trace.push(TraceEvent::Abort {
                round: self.round,
                transaction: txn_id,
                released,
            });
        }
    }

    fn record_stall(&mut self) {
        let graph = DeadlockDetector::wait_for_graph(&self.state.locks, &self.state.waits);
        let stall = Stall {
            waiting: self.state.waits.transactions(),
            cycle: DeadlockDetector::find_cycle(&graph),
        };
        error!(
            round = self.round,
            waiting = ?stall.waiting,
            cycle = ?stall.cycle,
            "no progress possible with operations still waiting"
        );
        self.stall = Some(stall);
    }

    fn record(&mut self, index: usize, outcome: Outcome, resumed: bool, violation: Option<Violation>) {
        let report = &mut self.reports[index];
        report.outcome = outcome;
        report.violation = violation;
        if outcome == Outcome::Wait || resumed {
            report.waited = true;
        }

        let operation = &report.operation;
        match outcome {
            Outcome::Ok if resumed => info!(round = self.round, op = %operation, "resumed"),
            Outcome::Ok => info!(round = self.round, op = %operation, "applied"),
            Outcome::Wait => debug!(round = self.round, op = %operation, "waiting"),
            Outcome::ProtocolViolation => warn!(
                round = self.round,
                op = %operation,
                reason = ?violation,
                "protocol violation"
            ),
            Outcome::DeadlockAborted => warn!(round = self.round, op = %operation, "deadlock victim"),
            Outcome::Skipped => info!(round = self.round, op = %operation, "skipped, transaction aborted"),
            Outcome::Discarded => debug!(round = self.round, op = %operation, "discarded"),
        }

        if self.config.record_trace {
            self.trace.push(TraceEvent::Operation {
                round: self.round,
                index,
                operation: operation.clone(),
                outcome,
                resumed,
                violation,
            });
        }
    }

    fn into_report(self) -> RunReport {
        let clean_finish = self.state.locks.is_empty() && self.state.waits.is_empty();

        let mut residual_waits = Vec::new();
        self.state
            .waits
            .for_each_pending(|_, pending| residual_waits.push(pending.clone()));

        if !clean_finish {
            error!(
                locked = self.state.locks.len(),
                pending = residual_waits.len(),
                "terminal check failed: lock table or wait queue not empty"
            );
        }

        let transactions: BTreeMap<TransactionId, _> = self
            .reports
            .iter()
            .map(|r| {
                let txn_id = r.operation.transaction;
                (txn_id, self.state.registry.phase(txn_id))
            })
            .collect();

        RunReport {
            aborted: self.state.registry.aborted().clone(),
            transactions,
            rounds: self.round,
            clean_finish,
            residual_locks: self.state.locks.snapshot(),
            residual_waits,
            stall: self.stall,
            operations: self.reports,
            trace: self.trace,
            deadlocks: self.deadlocks,
        }
    }
}

/// Admission rules of strict 2PL. Grants and releases are applied in place.
fn admit(locks: &mut LockTable, registry: &mut TransactionRegistry, operation: &Operation) -> Admission {
    let txn_id = operation.transaction;
    let variable = operation.variable.as_str();

    match operation.command {
        Command::Write => {
            if locks.is_held_exclusively_by(variable, txn_id) {
                Admission::Ok
            } else {
                Admission::Violation(Violation::WriteWithoutExclusiveLock)
            }
        }
        Command::Read => {
            if locks.is_held_by(variable, txn_id) {
                Admission::Ok
            } else {
                Admission::Violation(Violation::ReadWithoutLock)
            }
        }
        Command::LockShared | Command::LockExclusive => {
            if registry.has_unlocked(txn_id) {
                return Admission::Violation(Violation::LockAfterUnlock);
            }
            let acquired = match operation.command {
                Command::LockShared => locks.try_acquire_shared(variable, txn_id),
                _ => locks.try_acquire_exclusive(variable, txn_id),
            };
            match acquired {
                Acquire::Granted => Admission::Ok,
                Acquire::Blocked => Admission::Wait,
            }
        }
        Command::Unlock => match locks.release(variable, txn_id) {
            Release::Released => {
                registry.mark_unlocked(txn_id);
                Admission::Ok
            }
            Release::NotHeld => Admission::Violation(Violation::UnlockNotHeld),
        },
    }
}

/// Runs `operations` to completion with the default configuration.
pub fn run(operations: Vec<Operation>) -> RunReport {
    Scheduler::new(operations).run_to_completion()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_script_finishes_clean() {
        let report = run(Vec::new());
        assert!(report.clean_finish);
        assert_eq!(report.rounds, 1);
        assert!(report.operations.is_empty());
    }

    #[test]
    fn test_phases() {
        let mut scheduler = Scheduler::new(vec![
            Operation::lock_exclusive(1, "A"),
            Operation::lock_shared(2, "A"),
            Operation::unlock(1, "A"),
        ]);
        assert_eq!(scheduler.phase(), RunPhase::Running);
        assert_eq!(scheduler.step(), RunPhase::Running);
        assert_eq!(scheduler.step(), RunPhase::Running);
        assert!(scheduler.state().waits().is_waiting(TransactionId(2)));

        // Unlock is the last input; T2 is still queued until the next retry
        assert_eq!(scheduler.step(), RunPhase::Draining);
        assert_eq!(scheduler.step(), RunPhase::Done);
        assert!(scheduler.state().locks().is_held_by("A", TransactionId(2)));
        assert_eq!(scheduler.step(), RunPhase::Done);
        assert_eq!(scheduler.round(), 4);
    }

    #[test]
    fn test_admit_rules() {
        let mut locks = LockTable::new();
        let mut registry = TransactionRegistry::new();
        let mut check = |op: Operation| match admit(&mut locks, &mut registry, &op) {
            Admission::Ok => Ok(()),
            Admission::Wait => Err(None),
            Admission::Violation(v) => Err(Some(v)),
        };

        assert_eq!(check(Operation::read(1, "A")), Err(Some(Violation::ReadWithoutLock)));
        assert_eq!(check(Operation::lock_shared(1, "A")), Ok(()));
        assert_eq!(check(Operation::read(1, "A")), Ok(()));
        assert_eq!(check(Operation::write(1, "A")), Err(Some(Violation::WriteWithoutExclusiveLock)));
        assert_eq!(check(Operation::lock_exclusive(2, "A")), Err(None));
        assert_eq!(check(Operation::lock_exclusive(1, "A")), Ok(()));
        assert_eq!(check(Operation::write(1, "A")), Ok(()));
        assert_eq!(check(Operation::unlock(1, "A")), Ok(()));
        assert_eq!(check(Operation::unlock(1, "A")), Err(Some(Violation::UnlockNotHeld)));
        assert_eq!(check(Operation::lock_shared(1, "B")), Err(Some(Violation::LockAfterUnlock)));
    }

    #[test]
    fn test_trace_can_be_disabled() {
        let config = SchedulerConfig {
            record_trace: false,
            ..SchedulerConfig::default()
        };
        let report = Scheduler::with_config(vec![Operation::write(1, "A")], config).run_to_completion();
        assert!(report.trace.is_empty());
        assert_eq!(report.outcome(0), Some(Outcome::ProtocolViolation));
        assert!(report.is_aborted(TransactionId(1)));
    }
}
