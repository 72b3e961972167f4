//! Worker engine: lifecycle state machine, supervised iteration loop,
//! liveness watchdog and statistics.

mod control;
pub mod simple;
pub mod statistics;
mod watchdog;
pub mod worker;

pub use simple::{SimpleWorker, simple_worker};
pub use statistics::{StatisticsSnapshot, WorkerStatistics};
pub use worker::{Heartbeat, IterationContext, IterationUnit, Shutdown, Worker};
