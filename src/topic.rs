//! A topic: one bounded queue, a set of subscriptions, and the distributor
//! thread that drains the former into the latter.
//!
//! The distributor dispatches strictly in publish order. For each message
//! it snapshots the subscription set under the read lock and offers the
//! message to every subscriber sequentially with a short per-subscriber
//! deadline, so a stalled endpoint is skipped rather than allowed to block
//! the topic.
//!
//! While the topic has no subscribers the distributor leaves messages in
//! the queue, held for future subscribers or reaped by the TTL sweep, so
//! a bounded queue can fill up and reject publishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crate::constants::{DISTRIBUTOR_WAIT, NO_SUBSCRIBER_WAIT, SUBSCRIPTION_SEND_TIMEOUT};
use crate::error::Result;
use crate::message::Message;
use crate::queue::BoundedQueue;
use crate::subscription::Subscription;

type SubscriptionMap = Arc<RwLock<HashMap<String, Arc<Subscription>>>>;

#[derive(Debug)]
pub struct Topic {
    pub name: String,
    queue: Arc<BoundedQueue>,
    subscriptions: SubscriptionMap,
    message_count: AtomicU64,
    shutdown: Arc<AtomicBool>,
    distributor: Mutex<Option<JoinHandle<()>>>,
}

impl Topic {
    /// Create the topic and spawn its distributor thread.
    pub fn new(name: impl Into<String>, max_queue_size: usize) -> Self {
        let name = name.into();
        let queue = Arc::new(BoundedQueue::new(max_queue_size));
        let subscriptions: SubscriptionMap = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let distributor = {
            let name = name.clone();
            let queue = Arc::clone(&queue);
            let subscriptions = Arc::clone(&subscriptions);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || distributor_loop(&name, &queue, &subscriptions, &shutdown))
        };

        Self {
            name,
            queue,
            subscriptions,
            message_count: AtomicU64::new(0),
            shutdown,
            distributor: Mutex::new(Some(distributor)),
        }
    }

    /// Enqueue a message for fan-out. Fails with `QueueFull` on a saturated
    /// bounded queue.
    pub fn publish(&self, msg: Arc<Message>) -> Result<()> {
        self.queue.push(msg)?;
        self.message_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Attach a subscription. A subscription with the same id replaces (and
    /// closes) the previous one, so a repeated subscribe from the same
    /// client does not leak a dangling endpoint.
    pub fn add_subscription(&self, sub: Arc<Subscription>) {
        let mut subscriptions = self.subscriptions.write().expect("subscription map poisoned");
        if let Some(old) = subscriptions.insert(sub.id.clone(), sub) {
            old.close();
        }
    }

    /// Close and detach the subscription with the given id. Returns whether
    /// it was present.
    pub fn remove_subscription(&self, sub_id: &str) -> bool {
        let removed = {
            let mut subscriptions =
                self.subscriptions.write().expect("subscription map poisoned");
            subscriptions.remove(sub_id)
        };
        match removed {
            Some(sub) => {
                sub.close();
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .read()
            .expect("subscription map poisoned")
            .len()
    }

    /// Messages accepted over the topic's lifetime.
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn queue(&self) -> &BoundedQueue {
        &self.queue
    }

    /// Stop the distributor, then close every owned subscription.
    ///
    /// After this returns no previously attached subscription can receive
    /// another message from this topic.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.distributor.lock().expect("distributor handle poisoned").take()
        {
            let _ = handle.join();
        }

        let mut subscriptions = self.subscriptions.write().expect("subscription map poisoned");
        for sub in subscriptions.values() {
            sub.close();
        }
        subscriptions.clear();
    }
}

/// The per-topic distributor: pop in FIFO order, fan out to a snapshot of
/// the subscribers, ignore per-subscriber failures.
fn distributor_loop(
    name: &str,
    queue: &BoundedQueue,
    subscriptions: &RwLock<HashMap<String, Arc<Subscription>>>,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::Acquire) {
        // No subscribers: retain queued messages for whoever shows up.
        let has_subscribers = {
            let subscriptions = subscriptions.read().expect("subscription map poisoned");
            !subscriptions.is_empty()
        };
        if !has_subscribers {
            thread::sleep(NO_SUBSCRIBER_WAIT);
            continue;
        }

        let msg = match queue.pop_wait(DISTRIBUTOR_WAIT) {
            Ok(msg) => msg,
            Err(_) => continue,
        };

        let snapshot: Vec<Arc<Subscription>> = {
            let subscriptions = subscriptions.read().expect("subscription map poisoned");
            subscriptions.values().cloned().collect()
        };
        for sub in snapshot {
            if let Err(err) = sub.send(&msg, SUBSCRIPTION_SEND_TIMEOUT) {
                // Slow or inactive subscribers lose this message only.
                log::debug!("[topic {name}] dropping message for {}: {err}", sub.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::RecvTimeoutError;
    use std::time::Duration;

    fn msg(id: &str) -> Arc<Message> {
        Arc::new(Message::new(id, "orders", id.as_bytes().to_vec()))
    }

    fn drain(sub: &Subscription, n: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..n {
            match sub.recv_timeout(Duration::from_secs(2)) {
                Ok(m) => out.push(m.id.clone()),
                Err(_) => break,
            }
        }
        out
    }

    #[test]
    fn delivers_in_publish_order() {
        let topic = Topic::new("orders", 0);
        let sub = Arc::new(Subscription::new("c1", "orders", 100, None));
        topic.add_subscription(Arc::clone(&sub));

        for id in ["a", "b", "c"] {
            topic.publish(msg(id)).unwrap();
        }

        assert_eq!(drain(&sub, 3), vec!["a", "b", "c"]);
        topic.close();
    }

    #[test]
    fn fans_out_to_every_subscriber() {
        let topic = Topic::new("events", 0);
        let sub1 = Arc::new(Subscription::new("c1", "events", 100, None));
        let sub2 = Arc::new(Subscription::new("c2", "events", 100, None));
        topic.add_subscription(Arc::clone(&sub1));
        topic.add_subscription(Arc::clone(&sub2));
        assert_eq!(topic.subscriber_count(), 2);

        for id in ["x", "y", "z"] {
            topic.publish(msg(id)).unwrap();
        }

        assert_eq!(drain(&sub1, 3), vec!["x", "y", "z"]);
        assert_eq!(drain(&sub2, 3), vec!["x", "y", "z"]);
        topic.close();
    }

    #[test]
    fn messages_queue_up_without_subscribers() {
        let topic = Topic::new("orders", 2);
        topic.publish(msg("a")).unwrap();
        topic.publish(msg("b")).unwrap();

        // Distributor must not drain into the void.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(topic.queue().len(), 2);

        let err = topic.publish(msg("c")).unwrap_err();
        assert!(err.is_queue_full());
        topic.close();
    }

    #[test]
    fn queued_messages_reach_a_late_subscriber() {
        let topic = Topic::new("orders", 0);
        topic.publish(msg("early")).unwrap();

        let sub = Arc::new(Subscription::new("c1", "orders", 100, None));
        topic.add_subscription(Arc::clone(&sub));

        let got = sub.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got.id, "early");
        topic.close();
    }

    #[test]
    fn remove_subscription_closes_it() {
        let topic = Topic::new("orders", 0);
        let sub = Arc::new(Subscription::new("c1", "orders", 100, None));
        topic.add_subscription(Arc::clone(&sub));

        assert!(topic.remove_subscription("c1-orders"));
        assert!(!sub.is_active());
        assert!(!topic.remove_subscription("c1-orders"));
        assert_eq!(topic.subscriber_count(), 0);
        topic.close();
    }

    #[test]
    fn close_stops_distribution_and_subscriptions() {
        let topic = Topic::new("orders", 0);
        let sub = Arc::new(Subscription::new("c1", "orders", 100, None));
        topic.add_subscription(Arc::clone(&sub));
        topic.close();

        assert!(!sub.is_active());
        assert_eq!(topic.subscriber_count(), 0);
        assert!(matches!(
            sub.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn slow_subscriber_does_not_block_the_fast_one() {
        let topic = Topic::new("events", 0);
        let slow = Arc::new(Subscription::new("slow", "events", 1, None));
        let fast = Arc::new(Subscription::new("fast", "events", 100, None));
        topic.add_subscription(Arc::clone(&slow));
        topic.add_subscription(Arc::clone(&fast));

        // The slow buffer (capacity 1) saturates after the first message;
        // every further send to it burns only the per-subscriber deadline.
        for i in 0..10 {
            topic.publish(msg(&format!("m{i}"))).unwrap();
        }

        let got = drain(&fast, 10);
        assert_eq!(got.len(), 10);
        assert_eq!(got[0], "m0");
        assert_eq!(got[9], "m9");
        assert_eq!(slow.buffered(), 1);
        topic.close();
    }
}
