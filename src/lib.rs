//! Lock Scheduling Simulator Core
//!
//! Replays a script of per-transaction operations (read, write, shared lock,
//! exclusive lock, unlock) under strict two-phase locking. Every operation is
//! applied, deferred to a wait queue, or rejected as a protocol violation;
//! two-party deadlocks are broken by aborting one participant.

pub mod config;
pub mod error;
pub mod logging;
pub mod script;
pub mod transaction;

pub use config::{ConfigBuilder, SchedulerConfig, SimulatorConfig};
pub use error::{Error, Result};
pub use script::{load_script, parse_script};
pub use transaction::{run, Command, Operation, Outcome, RunReport, Scheduler, TransactionId};
