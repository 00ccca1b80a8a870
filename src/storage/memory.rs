//! In-memory message store with insertion-order eviction.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::Result;
use crate::message::Message;

use super::MessageStore;

struct Inner {
    messages: HashMap<String, Message>,
    /// Topic name → message ids, for `list`.
    topics: HashMap<String, HashSet<String>>,
    /// Insertion order, oldest first, for eviction.
    order: VecDeque<String>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Entry cap; 0 means unbounded.
    max_size: usize,
}

impl MemoryStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: HashMap::new(),
                topics: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageStore for MemoryStore {
    fn store(&self, msg: &Message) -> Result<()> {
        msg.validate()?;
        let mut inner = self.inner.lock().expect("store mutex poisoned");

        if self.max_size > 0 && inner.messages.len() >= self.max_size {
            evict_oldest(&mut inner);
        }

        inner.order.push_back(msg.id.clone());
        inner
            .topics
            .entry(msg.topic.clone())
            .or_default()
            .insert(msg.id.clone());
        inner.messages.insert(msg.id.clone(), msg.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Message>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.messages.get(id).cloned())
    }

    fn list(&self, topic: &str) -> Result<Vec<Message>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let Some(ids) = inner.topics.get(topic) else {
            return Ok(Vec::new());
        };
        Ok(inner
            .order
            .iter()
            .filter(|id| ids.contains(*id))
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect())
    }

    fn remove_expired(&self, ttl: Duration) -> Result<usize> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let expired: Vec<String> = inner
            .messages
            .values()
            .filter(|msg| msg.is_expired(ttl))
            .map(|msg| msg.id.clone())
            .collect();
        for id in &expired {
            remove_entry(&mut inner, id);
        }
        Ok(expired.len())
    }
}

fn evict_oldest(inner: &mut Inner) {
    if let Some(oldest) = inner.order.front().cloned() {
        remove_entry(inner, &oldest);
    }
}

fn remove_entry(inner: &mut Inner, id: &str) {
    if let Some(msg) = inner.messages.remove(id) {
        inner.order.retain(|other| other != id);
        if let Some(ids) = inner.topics.get_mut(&msg.topic) {
            ids.remove(id);
            if ids.is_empty() {
                inner.topics.remove(&msg.topic);
            }
        }
    }
}
