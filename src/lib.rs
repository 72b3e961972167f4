//! # workloop
//!
//! Concurrency core for message-driven worker services.
//!
//! Provides a bounded priority-lane message queue ([`queue`]), a supervised
//! iteration-loop engine with liveness watchdog and statistics ([`engine`]),
//! the standard executor that drains the queue into handlers ([`dispatch`]),
//! and OpenTelemetry observability ([`telemetry`]).

pub mod codec;
pub mod components;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod queue;
pub mod telemetry;

pub use error::{Error, Result};
