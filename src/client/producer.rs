//! Publishing side of the client library.

use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{bail, Context, Result};

use crate::protocol::{Command, CommandKind};

use super::{Client, ClientConfig};

/// A publisher that waits for the broker's ACK on every publish.
///
/// The inner client is mutex-guarded so request/response pairs never
/// interleave, which also makes the producer shareable across threads.
pub struct Producer {
    inner: Arc<Mutex<Client>>,
}

impl Producer {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Client::new(config))),
        }
    }

    pub fn connect(&self, addr: &str) -> Result<()> {
        self.inner.lock().expect("client mutex poisoned").connect(addr)
    }

    pub fn disconnect(&self) {
        self.inner.lock().expect("client mutex poisoned").disconnect();
    }

    /// Publish one message and wait for the acknowledgement.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut client = self.inner.lock().expect("client mutex poisoned");
        client
            .send_command(&Command::publish(topic, payload))
            .context("send publish")?;

        let reply = client.read_command().context("await ack")?;
        if reply.kind != CommandKind::Ack {
            bail!("publish to {topic:?}: expected ACK, got {:?}", reply.kind);
        }
        if reply.is_error_ack() {
            bail!(
                "publish to {topic:?} rejected: {}",
                String::from_utf8_lossy(&reply.payload)
            );
        }
        Ok(())
    }

    /// Publish several payloads in order, stopping at the first failure.
    pub fn publish_batch(&self, topic: &str, payloads: Vec<Vec<u8>>) -> Result<()> {
        for payload in payloads {
            self.publish(topic, payload)?;
        }
        Ok(())
    }

    /// Publish on a background thread and hand the outcome to `callback`.
    pub fn publish_async<F>(&self, topic: &str, payload: Vec<u8>, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let topic = topic.to_owned();
        thread::spawn(move || {
            let producer = Producer { inner };
            callback(producer.publish(&topic, payload));
        });
    }
}
