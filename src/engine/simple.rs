//! A worker whose iteration is a plain closure.

use crate::config::WorkerSettings;
use crate::error::Result;
use crate::model::Pace;
use std::future::Future;

use super::worker::{IterationContext, IterationUnit, Worker};

/// Runs `iteration` on every pass of the loop.
pub struct SimpleWorker<F> {
    iteration: F,
}

impl<F> SimpleWorker<F> {
    pub fn new(iteration: F) -> Self {
        Self { iteration }
    }
}

impl<F, Fut> IterationUnit for SimpleWorker<F>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Pace>> + Send + 'static,
{
    fn execute(&self, ctx: &IterationContext) -> impl Future<Output = Result<Pace>> + Send {
        (self.iteration)(ctx.clone())
    }
}

/// Build a worker around a closure.
pub fn simple_worker<F, Fut>(
    name: impl Into<String>,
    settings: WorkerSettings,
    iteration: F,
) -> Worker<SimpleWorker<F>>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Pace>> + Send + 'static,
{
    Worker::new(name, settings, SimpleWorker::new(iteration))
}
