//! Subscribing side of the client library.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};

use crate::protocol::{self, Command, CommandKind};

use super::{Client, ClientConfig};

type PushHandler = Box<dyn Fn(&Command) + Send>;

/// A subscriber with a single background read loop that demultiplexes
/// pushed PUBLISH frames to per-topic handlers.
///
/// One loop per connection: the first subscribe spawns it, later
/// subscribes only register their handler. Control frames the broker sends
/// after the loop is running (unsubscribe ACKs and the like) are consumed
/// and ignored by the loop.
pub struct Consumer {
    inner: Arc<Mutex<Client>>,
    handlers: Arc<Mutex<HashMap<String, PushHandler>>>,
    active: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Consumer {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Client::new(config))),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        }
    }

    pub fn connect(&self, addr: &str) -> Result<()> {
        self.inner
            .lock()
            .expect("client mutex poisoned")
            .connect(addr)?;
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    /// Subscribe to a topic and register `handler` for its pushes.
    ///
    /// The first subscription waits for the broker's ACK before the read
    /// loop starts; for later ones the loop already owns the socket, so a
    /// rejection surfaces only in the broker's log.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<()>
    where
        F: Fn(&Command) + Send + 'static,
    {
        let mut reader = self.reader.lock().expect("reader handle poisoned");
        let first_subscription = reader.is_none();

        {
            let mut client = self.inner.lock().expect("client mutex poisoned");
            client
                .send_command(&Command::subscribe(topic))
                .context("send subscribe")?;

            if first_subscription {
                let reply = client.read_command().context("await subscribe ack")?;
                if reply.kind != CommandKind::Ack {
                    bail!("subscribe to {topic:?}: expected ACK, got {:?}", reply.kind);
                }
                if reply.is_error_ack() {
                    bail!(
                        "subscribe to {topic:?} rejected: {}",
                        String::from_utf8_lossy(&reply.payload)
                    );
                }
            }
        }

        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .insert(topic.to_owned(), Box::new(handler));

        if first_subscription {
            let stream = self
                .inner
                .lock()
                .expect("client mutex poisoned")
                .clone_stream()?;
            // Pushes can be arbitrarily far apart; the loop blocks without a
            // read deadline and is unblocked by the socket shutdown in
            // `disconnect`.
            stream.set_read_timeout(None)?;

            let handlers = Arc::clone(&self.handlers);
            let active = Arc::clone(&self.active);
            *reader = Some(thread::spawn(move || {
                read_loop(stream, &handlers, &active);
            }));
        }

        log::info!("[consumer] subscribed to {topic:?}");
        Ok(())
    }

    /// Tell the broker to drop the subscription and stop dispatching its
    /// pushes. The ACK is consumed by the read loop.
    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .remove(topic);
        let mut client = self.inner.lock().expect("client mutex poisoned");
        client
            .send_command(&Command::unsubscribe(topic))
            .context("send unsubscribe")?;
        log::info!("[consumer] unsubscribed from {topic:?}");
        Ok(())
    }

    /// Stop the read loop and drop the connection.
    pub fn disconnect(&self) {
        self.active.store(false, Ordering::Release);
        self.inner.lock().expect("client mutex poisoned").disconnect();
        if let Some(handle) = self.reader.lock().expect("reader handle poisoned").take() {
            let _ = handle.join();
        }
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .clear();
    }
}

fn read_loop(
    mut stream: std::net::TcpStream,
    handlers: &Mutex<HashMap<String, PushHandler>>,
    active: &AtomicBool,
) {
    while active.load(Ordering::Acquire) {
        let cmd = match protocol::read_command(&mut stream) {
            Ok(cmd) => cmd,
            Err(err) => {
                log::debug!("[consumer] read loop ended: {err}");
                break;
            }
        };
        if cmd.kind != CommandKind::Publish {
            continue;
        }
        let handlers = handlers.lock().expect("handler registry poisoned");
        if let Some(handler) = handlers.get(&cmd.topic) {
            handler(&cmd);
        }
    }
}
