//! Core data model.
//!
//! Messages are opaque to the queue and the worker loop: the only thing the
//! core needs to know about a message is its kind, which drives statistics
//! and decoding. Workers move through a small lifecycle state machine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A unit of work carried through the prioritized queue.
///
/// The priority (lane) is assigned by the producer at enqueue time and is not
/// part of the message itself.
pub trait Message: Send + Sync + 'static {
    /// Type identifier, e.g. `"order.created"`.
    fn kind(&self) -> &str;
}

impl<T: Message + ?Sized> Message for Box<T> {
    fn kind(&self) -> &str {
        (**self).kind()
    }
}

impl<T: Message + ?Sized> Message for std::sync::Arc<T> {
    fn kind(&self) -> &str {
        (**self).kind()
    }
}

// ---------------------------------------------------------------------------
// Worker state
// ---------------------------------------------------------------------------

/// Lifecycle state of a worker.
///
/// A restart walks `Running -> Stopping -> Stopped`, waits, then re-enters
/// `Starting` without any call to `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl WorkerState {
    /// Can the state machine move from self to `to`?
    pub fn can_transition_to(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopping) // startup hook failed or stop requested
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Is the worker loop alive in this state?
    pub fn is_active(self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Running)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for WorkerState {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(WorkerState::Stopped),
            "starting" => Ok(WorkerState::Starting),
            "running" => Ok(WorkerState::Running),
            "stopping" => Ok(WorkerState::Stopping),
            other => Err(crate::error::Error::Other(format!(
                "unknown worker state: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Pacing
// ---------------------------------------------------------------------------

/// What a successful iteration asks the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// More work is pending: run the next iteration right away.
    Immediate,
    /// Sleep out the rest of the minimum iteration time first.
    Paced,
}
