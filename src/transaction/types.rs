// Transaction System Types
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub i64);

impl From<i64> for TransactionId {
    fn from(id: i64) -> Self {
        TransactionId(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn is_compatible(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

/// One instruction kind of a transaction script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "WRITE")]
    Write,
    #[serde(rename = "READ")]
    Read,
    #[serde(rename = "LOCK-S")]
    LockShared,
    #[serde(rename = "LOCK-X")]
    LockExclusive,
    #[serde(rename = "UNLOCK")]
    Unlock,
}

impl Command {
    /// Lock mode requested by this command, if it is a lock request.
    pub fn lock_mode(&self) -> Option<LockMode> {
        match self {
            Command::LockShared => Some(LockMode::Shared),
            Command::LockExclusive => Some(LockMode::Exclusive),
            Command::Write | Command::Read | Command::Unlock => None,
        }
    }

    pub fn is_lock_request(&self) -> bool {
        self.lock_mode().is_some()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Write => "WRITE",
            Command::Read => "READ",
            Command::LockShared => "LOCK-S",
            Command::LockExclusive => "LOCK-X",
            Command::Unlock => "UNLOCK",
        }
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WRITE" => Ok(Command::Write),
            "READ" => Ok(Command::Read),
            "LOCK-S" => Ok(Command::LockShared),
            "LOCK-X" => Ok(Command::LockExclusive),
            "UNLOCK" => Ok(Command::Unlock),
            _ => Err(Error::UnknownCommand(s.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single script instruction. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub transaction: TransactionId,
    pub command: Command,
    pub variable: String,
}

impl Operation {
    pub fn new(transaction: impl Into<TransactionId>, command: Command, variable: impl Into<String>) -> Self {
        Operation {
            transaction: transaction.into(),
            command,
            variable: variable.into(),
        }
    }

    pub fn write(transaction: i64, variable: impl Into<String>) -> Self {
        Self::new(transaction, Command::Write, variable)
    }

    pub fn read(transaction: i64, variable: impl Into<String>) -> Self {
        Self::new(transaction, Command::Read, variable)
    }

    pub fn lock_shared(transaction: i64, variable: impl Into<String>) -> Self {
        Self::new(transaction, Command::LockShared, variable)
    }

    pub fn lock_exclusive(transaction: i64, variable: impl Into<String>) -> Self {
        Self::new(transaction, Command::LockExclusive, variable)
    }

    pub fn unlock(transaction: i64, variable: impl Into<String>) -> Self {
        Self::new(transaction, Command::Unlock, variable)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.transaction.0, self.command, self.variable)
    }
}

/// Outcome of evaluating an operation, or its final state in a run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Ok,
    Wait,
    ProtocolViolation,
    DeadlockAborted,
    /// The transaction was already aborted when the operation was reached.
    Skipped,
    /// Pending work thrown away by an abort.
    Discarded,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Ok => "ok",
            Outcome::Wait => "wait",
            Outcome::ProtocolViolation => "protocol-violation",
            Outcome::DeadlockAborted => "deadlock-aborted",
            Outcome::Skipped => "skipped",
            Outcome::Discarded => "discarded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Violation {
    WriteWithoutExclusiveLock,
    ReadWithoutLock,
    /// Lock requested after the transaction entered its shrinking phase.
    LockAfterUnlock,
    UnlockNotHeld,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Violation::WriteWithoutExclusiveLock => "write without exclusive lock",
            Violation::ReadWithoutLock => "read without lock",
            Violation::LockAfterUnlock => "lock requested after unlock",
            Violation::UnlockNotHeld => "unlock of a lock not held",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trips_script_spelling() {
        for cmd in ["WRITE", "READ", "LOCK-S", "LOCK-X", "UNLOCK"] {
            let parsed: Command = cmd.parse().unwrap();
            assert_eq!(parsed.to_string(), cmd);
        }
    }

    #[test]
    fn test_unknown_command() {
        let err = "COMMIT".parse::<Command>().unwrap_err();
        assert!(matches!(err, Error::UnknownCommand(ref c) if c == "COMMIT"));
        assert!("lock-x".parse::<Command>().is_err());
    }

    #[test]
    fn test_lock_modes() {
        assert_eq!(Command::LockShared.lock_mode(), Some(LockMode::Shared));
        assert_eq!(Command::LockExclusive.lock_mode(), Some(LockMode::Exclusive));
        assert!(!Command::Unlock.is_lock_request());
        assert!(LockMode::Shared.is_compatible(&LockMode::Shared));
        assert!(!LockMode::Shared.is_compatible(&LockMode::Exclusive));
        assert!(!LockMode::Exclusive.is_compatible(&LockMode::Exclusive));
    }

    #[test]
    fn test_operation_display() {
        let op = Operation::lock_exclusive(7, "A");
        assert_eq!(op.to_string(), "7:LOCK-X:A");
        assert_eq!(op.transaction.to_string(), "txn:7");
    }
}
