// Transaction System Module
// Strict two-phase locking, wait queues, deadlock detection, abort

pub mod deadlock;
pub mod lock_table;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod types;
pub mod wait_queue;

pub use deadlock::*;
pub use lock_table::*;
pub use registry::*;
pub use report::*;
pub use scheduler::*;
pub use types::*;
pub use wait_queue::*;
