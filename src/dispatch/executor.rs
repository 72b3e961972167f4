//! The standard message executor: a worker unit that drains one message per
//! iteration from a [`PrioritizedQueue`] and hands it to the handler registry.

use crate::config::WorkerSettings;
use crate::engine::{IterationContext, IterationUnit, Worker};
use crate::error::Result;
use crate::model::{Message, Pace};
use crate::queue::PrioritizedQueue;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::HandlerRegistry;

/// Per-kind dispatch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSnapshot {
    pub dispatched: u64,
    pub failed: u64,
    pub by_kind: BTreeMap<String, u64>,
}

/// Counts every finished dispatch, successful or not.
#[derive(Debug, Default)]
pub struct DispatchStatistics {
    inner: Mutex<DispatchSnapshot>,
}

impl DispatchStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_finished(&self, kind: &str, succeeded: bool) {
        let mut inner = self.lock();
        inner.dispatched += 1;
        if !succeeded {
            inner.failed += 1;
        }
        *inner.by_kind.entry(kind.to_string()).or_default() += 1;
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = DispatchSnapshot::default();
    }

    fn lock(&self) -> MutexGuard<'_, DispatchSnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drains a queue into a handler registry.
pub struct MessageExecutor<M> {
    queue: Arc<PrioritizedQueue<M>>,
    handlers: Arc<HandlerRegistry<M>>,
    statistics: DispatchStatistics,
}

impl<M: Message> MessageExecutor<M> {
    pub fn new(queue: Arc<PrioritizedQueue<M>>, handlers: Arc<HandlerRegistry<M>>) -> Self {
        Self {
            queue,
            handlers,
            statistics: DispatchStatistics::new(),
        }
    }

    pub fn queue(&self) -> &Arc<PrioritizedQueue<M>> {
        &self.queue
    }

    pub fn handlers(&self) -> &HandlerRegistry<M> {
        &self.handlers
    }

    pub fn dispatch_statistics(&self) -> &DispatchStatistics {
        &self.statistics
    }

    fn process(&self, worker: &str, message: &M) -> Result<()> {
        let kind = message.kind();
        let result = self.handlers.dispatch(message);

        // Recorded whether or not a handler failed.
        self.statistics.message_finished(kind, result.is_ok());
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::messages_dispatched().add(
            1,
            &[
                KeyValue::new("worker", worker.to_string()),
                KeyValue::new("kind", kind.to_string()),
                KeyValue::new("result", outcome),
            ],
        );

        let delivered = result?;
        debug!(worker, kind, delivered, "message dispatched");
        Ok(())
    }
}

impl<M: Message> IterationUnit for MessageExecutor<M> {
    async fn execute(&self, ctx: &IterationContext) -> Result<Pace> {
        ctx.runner_is_alive();

        let message = self.queue.poll();
        match &message {
            Some(message) => self.process(ctx.worker(), message)?,
            None => debug!(worker = ctx.worker(), queue = self.queue.name(), "no messages in queue"),
        }

        if message.is_some() || !self.queue.is_empty() {
            Ok(Pace::Immediate)
        } else {
            Ok(Pace::Paced)
        }
    }
}

/// Build the standard executor worker for `queue`.
pub fn message_worker<M: Message>(
    name: impl Into<String>,
    settings: WorkerSettings,
    queue: Arc<PrioritizedQueue<M>>,
    handlers: Arc<HandlerRegistry<M>>,
) -> Worker<MessageExecutor<M>> {
    Worker::new(name, settings, MessageExecutor::new(queue, handlers))
}
