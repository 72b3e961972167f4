//! Explicit component composition.
//!
//! Each named component is constructed from its config section, and only if
//! that section's `enabled` flag is set.

use crate::config::ServiceConfig;
use crate::dispatch::{HandlerRegistry, MessageExecutor, message_worker};
use crate::engine::{IterationContext, Shutdown, SimpleWorker, Worker, simple_worker};
use crate::error::{Error, Result};
use crate::model::{Message, Pace};
use crate::queue::PrioritizedQueue;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// The queue and executor of a service, as enabled by its config.
pub struct Components<M: Message> {
    pub queue: Option<Arc<PrioritizedQueue<M>>>,
    pub executor: Option<Worker<MessageExecutor<M>>>,
}

impl<M: Message> Components<M> {
    pub fn build(config: &ServiceConfig, handlers: HandlerRegistry<M>) -> Result<Self> {
        config.validate()?;

        let queue = if config.queue.enabled {
            let settings = config.queue.settings()?;
            info!(queue = %config.queue.name, "queue enabled");
            Some(Arc::new(PrioritizedQueue::new(&config.queue.name, settings)))
        } else {
            None
        };

        let executor = if config.executor.enabled {
            let queue = queue.as_ref().ok_or_else(|| {
                Error::Config("executor is enabled but the queue it drains is disabled".into())
            })?;
            if handlers.is_empty() {
                tracing::warn!(worker = %config.executor.name, "executor enabled with no handlers");
            }
            info!(worker = %config.executor.name, handlers = handlers.len(), "executor enabled");
            Some(message_worker(
                &config.executor.name,
                config.executor.settings()?,
                Arc::clone(queue),
                Arc::new(handlers),
            ))
        } else {
            None
        };

        Ok(Self { queue, executor })
    }

    /// The simple worker, if `[simple_worker]` is enabled.
    pub fn simple_worker<F, Fut>(
        config: &ServiceConfig,
        iteration: F,
    ) -> Result<Option<Worker<SimpleWorker<F>>>>
    where
        F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Pace>> + Send + 'static,
    {
        if !config.simple_worker.enabled {
            return Ok(None);
        }
        let settings = config.simple_worker.settings()?;
        info!(worker = %config.simple_worker.name, "simple worker enabled");
        Ok(Some(simple_worker(
            &config.simple_worker.name,
            settings,
            iteration,
        )))
    }

    /// Start every enabled worker.
    pub fn start(&self) {
        if let Some(executor) = &self.executor {
            executor.start();
        }
    }

    pub async fn stop(&self) -> Shutdown {
        match &self.executor {
            Some(executor) => executor.stop().await,
            None => Shutdown::NotRunning,
        }
    }
}
