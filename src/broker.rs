//! The broker: topic registry, publish/subscribe surface, and the TTL
//! cleanup loop.
//!
//! Locking discipline: the registry lock is held only for map lookups and
//! updates, never across a call into a topic. Topic operations take their
//! own locks and may block on queue or subscription state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::constants::SUBSCRIPTION_BUFFER;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::storage::MessageStore;
use crate::subscription::Subscription;
use crate::topic::Topic;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Default queue capacity for new topics; 0 means unbounded.
    pub max_queue_size: usize,
    /// Cap on concurrently existing topics; 0 means unlimited.
    pub max_topics: usize,
    pub message_ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_topics: 1000,
            message_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

type TopicMap = Arc<RwLock<HashMap<String, Arc<Topic>>>>;

pub struct Broker {
    topics: TopicMap,
    config: BrokerConfig,
    store: Option<Box<dyn MessageStore>>,

    // Monotonic observational metrics; not part of delivery correctness.
    total_messages: AtomicU64,
    active_subscriptions: AtomicU64,

    stop_cleanup: Mutex<Option<Sender<()>>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            config,
            store: None,
            total_messages: AtomicU64::new(0),
            active_subscriptions: AtomicU64::new(0),
            stop_cleanup: Mutex::new(None),
            cleanup: Mutex::new(None),
        }
    }

    /// A broker that mirrors every published message into a storage
    /// backend. Delivery never depends on the mirror; storage failures are
    /// logged and publishing proceeds.
    pub fn with_store(config: BrokerConfig, store: Box<dyn MessageStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(config)
        }
    }

    /// Launch the periodic TTL cleanup loop.
    pub fn start(&self) {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        *self.stop_cleanup.lock().expect("cleanup sender poisoned") = Some(stop_tx);

        let topics = Arc::clone(&self.topics);
        let ttl = self.config.message_ttl;
        let interval = self.config.cleanup_interval;
        let handle = thread::spawn(move || cleanup_loop(&topics, ttl, interval, &stop_rx));
        *self.cleanup.lock().expect("cleanup handle poisoned") = Some(handle);
    }

    /// Stop the cleanup loop, then close every topic.
    pub fn stop(&self) {
        self.stop_cleanup
            .lock()
            .expect("cleanup sender poisoned")
            .take();
        if let Some(handle) = self.cleanup.lock().expect("cleanup handle poisoned").take() {
            let _ = handle.join();
        }

        let drained: Vec<Arc<Topic>> = {
            let mut topics = self.topics.write().expect("topic registry poisoned");
            topics.drain().map(|(_, topic)| topic).collect()
        };
        for topic in drained {
            topic.close();
        }
        log::info!("[broker] stopped");
    }

    /// Create a topic with the default queue size. Fails if it exists.
    pub fn create_topic(&self, name: &str) -> Result<Arc<Topic>> {
        let mut topics = self.topics.write().expect("topic registry poisoned");
        if topics.contains_key(name) {
            return Err(Error::TopicExists(name.to_owned()));
        }
        if self.config.max_topics > 0 && topics.len() >= self.config.max_topics {
            return Err(Error::TopicLimit(self.config.max_topics));
        }
        let topic = Arc::new(Topic::new(name, self.config.max_queue_size));
        topics.insert(name.to_owned(), Arc::clone(&topic));
        log::info!("[broker] created topic {name:?}");
        Ok(topic)
    }

    /// Close and remove a topic.
    pub fn delete_topic(&self, name: &str) -> Result<()> {
        let removed = {
            let mut topics = self.topics.write().expect("topic registry poisoned");
            topics.remove(name)
        };
        match removed {
            Some(topic) => {
                topic.close();
                log::info!("[broker] deleted topic {name:?}");
                Ok(())
            }
            None => Err(Error::TopicNotFound(name.to_owned())),
        }
    }

    pub fn get_topic(&self, name: &str) -> Result<Arc<Topic>> {
        let topics = self.topics.read().expect("topic registry poisoned");
        topics
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TopicNotFound(name.to_owned()))
    }

    /// Publish a message, auto-creating the topic if needed.
    pub fn publish(&self, topic_name: &str, msg: Message) -> Result<()> {
        if topic_name.is_empty() {
            return Err(Error::InvalidRequest("publish requires a topic".into()));
        }

        let msg = Arc::new(msg);
        let topic = self.get_or_create(topic_name)?;
        topic.publish(Arc::clone(&msg))?;
        self.total_messages.fetch_add(1, Ordering::Relaxed);

        if let Some(store) = &self.store {
            if let Err(err) = store.store(&msg) {
                log::warn!("[broker] storage write for {:?} failed: {err}", msg.id);
            }
        }
        Ok(())
    }

    /// Subscribe a client to a topic, auto-creating the topic if needed.
    /// Returns the subscription handle whose buffer the caller drains.
    pub fn subscribe(&self, topic_name: &str, client_id: &str) -> Result<Arc<Subscription>> {
        if topic_name.is_empty() {
            return Err(Error::InvalidRequest("subscribe requires a topic".into()));
        }

        let topic = self.get_or_create(topic_name)?;
        let sub = Arc::new(Subscription::new(
            client_id,
            topic_name,
            SUBSCRIPTION_BUFFER,
            None,
        ));
        topic.add_subscription(Arc::clone(&sub));
        self.active_subscriptions.fetch_add(1, Ordering::Relaxed);
        log::info!("[broker] subscribed {} to {topic_name:?}", sub.id);
        Ok(sub)
    }

    /// Remove a subscription by id from whichever topic holds it. Absence
    /// is not an error.
    pub fn unsubscribe(&self, sub_id: &str) {
        let snapshot: Vec<Arc<Topic>> = {
            let topics = self.topics.read().expect("topic registry poisoned");
            topics.values().cloned().collect()
        };
        for topic in snapshot {
            if topic.remove_subscription(sub_id) {
                log::info!("[broker] unsubscribed {sub_id}");
            }
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().expect("topic registry poisoned").len()
    }

    /// Messages accepted since startup.
    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    /// Subscriptions created since startup.
    pub fn active_subscriptions(&self) -> u64 {
        self.active_subscriptions.load(Ordering::Relaxed)
    }

    fn get_or_create(&self, name: &str) -> Result<Arc<Topic>> {
        {
            let topics = self.topics.read().expect("topic registry poisoned");
            if let Some(topic) = topics.get(name) {
                return Ok(Arc::clone(topic));
            }
        }

        let mut topics = self.topics.write().expect("topic registry poisoned");
        if let Some(topic) = topics.get(name) {
            return Ok(Arc::clone(topic));
        }
        if self.config.max_topics > 0 && topics.len() >= self.config.max_topics {
            return Err(Error::TopicLimit(self.config.max_topics));
        }
        let topic = Arc::new(Topic::new(name, self.config.max_queue_size));
        topics.insert(name.to_owned(), Arc::clone(&topic));
        log::info!("[broker] created topic {name:?}");
        Ok(topic)
    }
}

/// Sweep every topic's queue on a fixed interval until the stop channel
/// disconnects.
fn cleanup_loop(
    topics: &RwLock<HashMap<String, Arc<Topic>>>,
    ttl: Duration,
    interval: Duration,
    stop: &Receiver<()>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let snapshot: Vec<Arc<Topic>> = {
                    let topics = topics.read().expect("topic registry poisoned");
                    topics.values().cloned().collect()
                };
                for topic in snapshot {
                    let removed = topic.queue().remove_expired(ttl);
                    if removed > 0 {
                        log::debug!(
                            "[broker] expired {removed} message(s) from {:?}",
                            topic.name
                        );
                    }
                }
            }
            // Signal or sender dropped: shut down.
            _ => return,
        }
    }
}
