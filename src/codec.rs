//! Message type registry: decode strategies keyed by message kind.
//!
//! Built once at startup through [`MessageTypeRegistry::register`], then
//! shared read-only (typically behind an `Arc`) with whatever feeds the queue.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

type Decoder<M> = Box<dyn Fn(serde_json::Value) -> Result<M> + Send + Sync>;

/// Maps a message kind to the code that turns a JSON payload into `M`.
pub struct MessageTypeRegistry<M> {
    decoders: HashMap<String, Decoder<M>>,
}

impl<M> MessageTypeRegistry<M> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register `kind`: payloads deserialize into `T`, which `construct`
    /// turns into a message. A kind can be registered only once.
    pub fn register<T, F>(&mut self, kind: &str, construct: F) -> Result<&mut Self>
    where
        M: 'static,
        T: DeserializeOwned + 'static,
        F: Fn(T) -> M + Send + Sync + 'static,
    {
        if self.decoders.contains_key(kind) {
            return Err(Error::Config(format!(
                "message kind {kind} is already registered"
            )));
        }
        let owned_kind = kind.to_string();
        self.decoders.insert(
            kind.to_string(),
            Box::new(move |payload| {
                serde_json::from_value::<T>(payload)
                    .map(&construct)
                    .map_err(|source| Error::Decode {
                        kind: owned_kind.clone(),
                        source,
                    })
            }),
        );
        Ok(self)
    }

    pub fn decode(&self, kind: &str, payload: serde_json::Value) -> Result<M> {
        let decoder = self
            .decoders
            .get(kind)
            .ok_or_else(|| Error::UnknownMessageKind(kind.to_string()))?;
        decoder(payload)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl<M> Default for MessageTypeRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
