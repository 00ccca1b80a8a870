//! The message type shared by the broker, the storage backends, and the
//! client library.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single published message.
///
/// Created once when a publish command is decoded, then shared read-only
/// (as `Arc<Message>`) across every subscription it fans out to. The
/// timestamp is assigned server-side at publish time and drives TTL expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identifier (UUID). May be empty for messages that
    /// were never routed through the broker.
    pub id: String,
    /// Topic the message was published on.
    pub topic: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Creation time, set at publish.
    pub timestamp: DateTime<Utc>,
    /// Optional metadata headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Reserved for prioritized dispatch; the distributor is FIFO.
    #[serde(default)]
    pub priority: u32,
}

impl Message {
    pub fn new(id: impl Into<String>, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
            headers: None,
            priority: 0,
        }
    }

    /// Checks the fields the broker relies on before a message enters a
    /// queue or a storage backend.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidMessage("message id is required".into()));
        }
        if self.topic.is_empty() {
            return Err(Error::InvalidMessage("message topic is required".into()));
        }
        Ok(())
    }

    /// Time elapsed since the message was created. Clamps to zero for
    /// timestamps in the future.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.timestamp).to_std().unwrap_or_default()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}
