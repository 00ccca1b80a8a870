//! Broker error taxonomy.
//!
//! One variant per failure kind, with classification predicates so callers
//! can branch on the kind without destructuring. Transient per-frame errors
//! are logged and skipped; I/O errors close the owning connection; broker
//! failures surface to publishers as ACK frames carrying the error text.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("topic not found: {0:?}")]
    TopicNotFound(String),

    #[error("topic already exists: {0:?}")]
    TopicExists(String),

    #[error("topic limit reached ({0})")]
    TopicLimit(usize),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("queue is full")]
    QueueFull,

    #[error("queue is empty")]
    QueueEmpty,

    #[error("subscription inactive")]
    SubscriptionInactive,

    #[error("send to subscription timed out")]
    SubscriberSlow,

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::TopicNotFound(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Error::InvalidMessage(_) | Error::InvalidRequest(_))
    }

    pub fn is_queue_full(&self) -> bool {
        matches!(self, Error::QueueFull)
    }

    /// True for any deadline-shaped failure: socket timeouts and slow
    /// subscribers alike.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::SubscriberSlow)
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed(_) | Error::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
