//! In-memory publish/subscribe message broker over a length-prefixed
//! binary TCP protocol.
//!
//! Producers publish payloads on named topics; every connected subscriber
//! of a topic receives its own copy, in publish order, through a bounded
//! per-subscription buffer. Topics hold bounded FIFO queues, a periodic
//! sweep expires messages past their TTL, and slow consumers are isolated
//! by deadline-bounded sends rather than allowed to stall the fan-out.

// Library modules
pub mod broker;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod message;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod storage;
pub mod subscription;
pub mod topic;

// Re-export commonly used types
pub use broker::{Broker, BrokerConfig};
pub use client::{ClientConfig, Consumer, Producer};
pub use config::Config;
pub use error::{Error, Result};
pub use message::Message;
pub use protocol::{Command, CommandKind, StatusCode};
pub use queue::BoundedQueue;
pub use server::{Server, ServerConfig};
pub use subscription::Subscription;
pub use topic::Topic;
