//! Bounded per-topic FIFO queue.
//!
//! One mutex serializes every operation; a condvar wakes the topic
//! distributor as soon as a publisher pushes, so the idle path parks
//! instead of polling.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::message::Message;

#[derive(Debug)]
pub struct BoundedQueue {
    messages: Mutex<VecDeque<Arc<Message>>>,
    available: Condvar,
    /// Hard capacity; 0 means unbounded.
    max_size: usize,
}

impl BoundedQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Append at the tail. Fails without mutating the queue when the
    /// capacity is reached.
    pub fn push(&self, msg: Arc<Message>) -> Result<()> {
        let mut messages = self.messages.lock().expect("queue mutex poisoned");
        if self.max_size > 0 && messages.len() >= self.max_size {
            return Err(Error::QueueFull);
        }
        messages.push_back(msg);
        self.available.notify_one();
        Ok(())
    }

    /// Remove and return the head, or fail immediately when empty.
    pub fn pop(&self) -> Result<Arc<Message>> {
        let mut messages = self.messages.lock().expect("queue mutex poisoned");
        messages.pop_front().ok_or(Error::QueueEmpty)
    }

    /// Remove and return the head, waiting up to `timeout` for a push.
    ///
    /// A spurious wakeup surfaces as `QueueEmpty` before the timeout; the
    /// distributor loops, so early returns only cost one extra iteration.
    pub fn pop_wait(&self, timeout: Duration) -> Result<Arc<Message>> {
        let mut messages = self.messages.lock().expect("queue mutex poisoned");
        if let Some(msg) = messages.pop_front() {
            return Ok(msg);
        }
        let (mut messages, _) = self
            .available
            .wait_timeout(messages, timeout)
            .expect("queue mutex poisoned");
        messages.pop_front().ok_or(Error::QueueEmpty)
    }

    /// Return the head without removing it.
    pub fn peek(&self) -> Result<Arc<Message>> {
        let messages = self.messages.lock().expect("queue mutex poisoned");
        messages.front().cloned().ok_or(Error::QueueEmpty)
    }

    pub fn len(&self) -> usize {
        self.messages.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.messages.lock().expect("queue mutex poisoned").clear();
    }

    /// Delete in place every message whose creation time plus `ttl` is in
    /// the past. Returns how many were removed.
    pub fn remove_expired(&self, ttl: Duration) -> usize {
        let mut messages = self.messages.lock().expect("queue mutex poisoned");
        let before = messages.len();
        messages.retain(|msg| !msg.is_expired(ttl));
        before - messages.len()
    }
}
