//! Error types for workloop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid priority {priority}: queue has {lanes} lane(s)")]
    InvalidPriority { priority: usize, lanes: usize },

    /// Raised by blocking waits and units of work when the owning worker is
    /// shutting down. Converted into a graceful stop, never a restart.
    #[error("operation cancelled")]
    Cancelled,

    #[error("iteration failed: {0}")]
    Iteration(String),

    #[error("handler {handler} failed: {message}")]
    Handler { handler: String, message: String },

    #[error("no heartbeat for {elapsed_ms} ms")]
    LivenessTimeout { elapsed_ms: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown message kind: {0}")]
    UnknownMessageKind(String),

    #[error("cannot decode message of kind {kind}: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error asks the worker to stop rather than restart.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
