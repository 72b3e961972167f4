//! Structured events emitted by workers on every lifecycle change.
//!
//! Consumers subscribe to a worker's event stream to build dashboards,
//! alerting, or to wait on state changes in tests. Events are best effort: a
//! subscriber that falls behind loses the oldest ones.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::model::WorkerState;

const EVENT_BUFFER: usize = 256;

/// A structured event emitted by a worker.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Monotonic per-worker sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub worker: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StateChanged {
        from: WorkerState,
        to: WorkerState,
    },
    IterationFailed {
        error: String,
        restart: bool,
    },
    LivenessTimeout {
        elapsed_ms: u64,
    },
    RestartScheduled {
        delay_ms: u64,
    },
    ShutdownForced {
        waited_ms: u64,
    },
}

/// Fan-out of a worker's events.
pub(crate) struct EventBus {
    worker: String,
    seq: AtomicU64,
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub(crate) fn new(worker: &str) -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            worker: worker.to_string(),
            seq: AtomicU64::new(0),
            sender,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            worker: self.worker.clone(),
            kind,
        };
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
