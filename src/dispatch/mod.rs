//! Message handlers and their registry.
//!
//! The registry is built explicitly at startup and then shared read-only with
//! the executor. Each handler decides for itself which messages it wants.

pub mod executor;

pub use executor::{DispatchStatistics, DispatchSnapshot, MessageExecutor, message_worker};

use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Receives messages polled by a [`MessageExecutor`].
pub trait MessageHandler<M>: Send + Sync {
    /// Name used in logs and error reports.
    fn name(&self) -> &str;

    /// Content-based filter. Defaults to every message.
    fn is_interested(&self, message: &M) -> bool {
        let _ = message;
        true
    }

    fn handle(&self, message: &M) -> Result<()>;
}

/// Ordered set of handlers.
pub struct HandlerRegistry<M> {
    handlers: Vec<Arc<dyn MessageHandler<M>>>,
}

impl<M> HandlerRegistry<M> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, handler: Arc<dyn MessageHandler<M>>) -> Self {
        self.register(handler);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn MessageHandler<M>>) {
        debug!(handler = handler.name(), "handler registered");
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    /// Deliver `message` to every interested handler, in registration order.
    ///
    /// Stops at the first failing handler. Returns how many handlers received
    /// the message. A handler returning [`Error::Cancelled`] passes it through
    /// unchanged; other failures are wrapped in [`Error::Handler`].
    pub fn dispatch(&self, message: &M) -> Result<usize> {
        let mut delivered = 0;
        for handler in &self.handlers {
            if !handler.is_interested(message) {
                continue;
            }
            handler.handle(message).map_err(|err| match err {
                Error::Cancelled => Error::Cancelled,
                other => Error::Handler {
                    handler: handler.name().to_string(),
                    message: other.to_string(),
                },
            })?;
            delivered += 1;
        }
        Ok(delivered)
    }
}

impl<M> Default for HandlerRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
