//! Per-(connection, topic) delivery endpoint.
//!
//! A subscription is a bounded buffer between the topic distributor and a
//! delivery task. The distributor pushes with a short deadline so one slow
//! subscriber cannot hold up the fan-out; the delivery task drains with a
//! bounded wait so it can observe shutdown.
//!
//! Closure is two-step: the active flag flips first, then the sender side
//! of the buffer is released. A send that races with closure either fails
//! the flag check or lands in a buffer that is torn down with the channel;
//! it is dropped, never redelivered, and never a panic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{Error, Result};
use crate::message::Message;

/// Optional per-subscription predicate; messages it rejects are skipped
/// without error.
pub type MessageFilter = Box<dyn Fn(&Message) -> bool + Send + Sync>;

pub struct Subscription {
    /// `"<client_id>-<topic>"`, the registry key inside the owning topic.
    pub id: String,
    pub topic: String,
    pub client_id: String,
    active: AtomicBool,
    sender: Mutex<Option<Sender<Arc<Message>>>>,
    receiver: Receiver<Arc<Message>>,
    filter: Option<MessageFilter>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("client_id", &self.client_id)
            .field("active", &self.active)
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

impl Subscription {
    pub fn new(
        client_id: impl Into<String>,
        topic: impl Into<String>,
        buffer: usize,
        filter: Option<MessageFilter>,
    ) -> Self {
        let client_id = client_id.into();
        let topic = topic.into();
        let (sender, receiver) = bounded(buffer);
        Self {
            id: format!("{client_id}-{topic}"),
            topic,
            client_id,
            active: AtomicBool::new(true),
            sender: Mutex::new(Some(sender)),
            receiver,
            filter,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Offer a message to this subscriber, waiting at most `timeout` for
    /// buffer space.
    ///
    /// At-most-once per subscriber: a deadline or inactive endpoint drops
    /// the message for this subscription only, and nothing is redelivered.
    pub fn send(&self, msg: &Arc<Message>, timeout: Duration) -> Result<()> {
        if !self.is_active() {
            return Err(Error::SubscriptionInactive);
        }
        if let Some(filter) = &self.filter {
            if !filter(msg) {
                return Ok(());
            }
        }

        // Clone the sender out so closure is never blocked behind a full
        // buffer for the duration of the deadline.
        let sender = {
            let guard = self.sender.lock().expect("subscription sender mutex poisoned");
            guard.as_ref().cloned()
        };
        let Some(sender) = sender else {
            return Err(Error::SubscriptionInactive);
        };
        sender
            .send_timeout(Arc::clone(msg), timeout)
            .map_err(|_| Error::SubscriberSlow)
    }

    /// Pull one buffered message, waiting up to `timeout`.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Arc<Message>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Messages currently buffered and not yet pulled by the delivery task.
    pub fn buffered(&self) -> usize {
        self.receiver.len()
    }

    /// Deactivate, then release the buffer. Safe to call more than once.
    ///
    /// The delivery task drains whatever was already buffered and then sees
    /// the channel disconnect.
    pub fn close(&self) {
        self.active.store(false, Ordering::Release);
        self.sender
            .lock()
            .expect("subscription sender mutex poisoned")
            .take();
    }
}
