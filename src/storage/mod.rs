//! Message storage backends.
//!
//! The broker mirrors every accepted publish into a [`MessageStore`] so
//! operators can inspect recent traffic; delivery correctness never depends
//! on the mirror. Two backends exist, selected by configuration: an
//! in-memory store with LRU eviction and an append-only file log.

pub mod file;
pub mod memory;

use std::time::Duration;

use crate::config::StorageSection;
use crate::error::{Error, Result};
use crate::message::Message;

pub use file::FileStore;
pub use memory::MemoryStore;

pub trait MessageStore: Send + Sync {
    /// Record one message, keyed by its id.
    fn store(&self, msg: &Message) -> Result<()>;

    /// Fetch a message by id.
    fn get(&self, id: &str) -> Result<Option<Message>>;

    /// All stored messages for a topic, in insertion order.
    fn list(&self, topic: &str) -> Result<Vec<Message>>;

    /// Drop messages older than `ttl`. Returns how many were removed.
    fn remove_expired(&self, ttl: Duration) -> Result<usize>;
}

/// Build the backend named by the configuration.
pub fn open(config: &StorageSection) -> Result<Box<dyn MessageStore>> {
    match config.kind.as_str() {
        "memory" => Ok(Box::new(MemoryStore::new(config.max_size))),
        "file" => Ok(Box::new(FileStore::open(&config.path)?)),
        other => Err(Error::InvalidRequest(format!(
            "unknown storage kind {other:?}"
        ))),
    }
}
