//! One accepted TCP connection: a reader thread, a writer thread, and the
//! bounded outbound command channel between the broker and the socket.
//!
//! The outbound channel is the per-connection backpressure point. `send`
//! never blocks: when the channel is full the command is dropped with a
//! log line, so neither the reader nor any topic distributor can be held
//! up by one congested peer.

use std::collections::HashSet;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::constants::OUTBOUND_BUFFER;
use crate::error::{Error, Result};
use crate::protocol::{self, Command};

use super::handler::Handler;

pub struct Connection {
    /// Remote address; doubles as the client id for subscription ids.
    pub id: String,
    stream: TcpStream,
    outbound: Mutex<Option<Sender<Command>>>,
    active: AtomicBool,
    /// Topics this connection has subscribed to, for teardown on close.
    subscriptions: Mutex<HashSet<String>>,
}

impl Connection {
    /// Build the connection state without spawning threads. Split out so
    /// channel semantics are testable in isolation.
    pub(crate) fn new(
        stream: TcpStream,
        capacity: usize,
    ) -> Result<(Arc<Self>, Receiver<Command>)> {
        let id = stream.peer_addr()?.to_string();
        let (outbound_tx, outbound_rx) = bounded(capacity);
        let conn = Arc::new(Self {
            id,
            stream,
            outbound: Mutex::new(Some(outbound_tx)),
            active: AtomicBool::new(true),
            subscriptions: Mutex::new(HashSet::new()),
        });
        Ok((conn, outbound_rx))
    }

    /// Set up a freshly accepted socket: apply the per-frame deadlines and
    /// start the reader and writer threads.
    pub fn spawn(
        stream: TcpStream,
        handler: Arc<Handler>,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Arc<Self>> {
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_write_timeout(Some(write_timeout))?;

        let reader_stream = stream.try_clone()?;
        let writer_stream = stream.try_clone()?;
        let (conn, outbound_rx) = Self::new(stream, OUTBOUND_BUFFER)?;

        {
            let conn = Arc::clone(&conn);
            thread::spawn(move || reader_loop(reader_stream, &conn, &handler));
        }
        {
            let conn = Arc::clone(&conn);
            thread::spawn(move || writer_loop(writer_stream, &outbound_rx, &conn));
        }
        Ok(conn)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Enqueue a command for the writer. Never blocks; drops with a log
    /// line when the connection is gone or the channel is full.
    pub fn send(&self, cmd: Command) {
        if !self.is_active() {
            log::debug!("[conn {}] dropping {:?}: connection inactive", self.id, cmd.kind);
            return;
        }
        let sender = {
            let guard = self.outbound.lock().expect("outbound sender poisoned");
            guard.as_ref().cloned()
        };
        match sender {
            Some(sender) => {
                if let Err(err) = sender.try_send(cmd) {
                    log::warn!("[conn {}] dropping outbound command: {err}", self.id);
                }
            }
            None => {
                log::debug!("[conn {}] dropping {:?}: channel released", self.id, cmd.kind);
            }
        }
    }

    /// Idempotent teardown: mark inactive, shut the socket both ways (this
    /// unblocks the reader), and release the outbound sender so the writer
    /// drains what is queued and exits.
    pub fn close(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.outbound.lock().expect("outbound sender poisoned").take();
            log::info!("[conn {}] closed", self.id);
        }
    }

    pub(crate) fn track_subscription(&self, topic: &str) {
        self.subscriptions
            .lock()
            .expect("subscription set poisoned")
            .insert(topic.to_owned());
    }

    pub(crate) fn untrack_subscription(&self, topic: &str) {
        self.subscriptions
            .lock()
            .expect("subscription set poisoned")
            .remove(topic);
    }

    /// Drain the subscribed-topics set for teardown.
    pub(crate) fn take_subscriptions(&self) -> Vec<String> {
        let mut subscriptions = self.subscriptions.lock().expect("subscription set poisoned");
        subscriptions.drain().collect()
    }
}

/// Reader: one length-prefixed frame at a time. Malformed bodies are
/// skipped; transport-level failures (I/O errors, EOF, the read deadline,
/// oversized frames) end the connection, since the stream cannot be
/// resynchronized.
fn reader_loop(mut stream: TcpStream, conn: &Arc<Connection>, handler: &Arc<Handler>) {
    while conn.is_active() {
        let body = match protocol::read_frame(&mut stream) {
            Ok(body) => body,
            Err(Error::Io(err)) => {
                log::debug!("[conn {}] read ended: {err}", conn.id);
                break;
            }
            Err(err) => {
                log::warn!("[conn {}] unreadable frame: {err}", conn.id);
                break;
            }
        };
        let cmd = match protocol::decode(&body) {
            Ok(cmd) => cmd,
            Err(err) => {
                log::warn!("[conn {}] skipping invalid command: {err}", conn.id);
                continue;
            }
        };
        handler.handle(conn, cmd);
    }
    conn.close();
    handler.connection_closed(conn);
}

/// Writer: encode and write until the outbound channel disconnects or the
/// socket fails.
fn writer_loop(mut stream: TcpStream, outbound: &Receiver<Command>, conn: &Arc<Connection>) {
    for cmd in outbound.iter() {
        let body = match protocol::encode(&cmd) {
            Ok(body) => body,
            Err(err) => {
                log::warn!("[conn {}] skipping unencodable command: {err}", conn.id);
                continue;
            }
        };
        if let Err(err) = protocol::write_frame(&mut stream, &body) {
            log::debug!("[conn {}] write ended: {err}", conn.id);
            break;
        }
    }
    conn.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandKind;
    use std::net::{TcpListener, TcpStream};
    use std::time::Instant;

    /// A connected socket pair over loopback.
    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn send_drops_on_full_channel_without_blocking() {
        let (server, _client) = socket_pair();
        let (conn, rx) = Connection::new(server, 2).unwrap();

        let start = Instant::now();
        conn.send(Command::ping());
        conn.send(Command::ping());
        conn.send(Command::ping()); // dropped
        assert!(start.elapsed() < Duration::from_millis(100));

        assert_eq!(rx.len(), 2);
        assert_eq!(rx.try_recv().unwrap().kind, CommandKind::Ping);
    }

    #[test]
    fn send_preserves_order() {
        let (server, _client) = socket_pair();
        let (conn, rx) = Connection::new(server, 10).unwrap();

        conn.send(Command::ack("a"));
        conn.send(Command::publish("a", b"1".to_vec()));
        conn.send(Command::pong());

        assert_eq!(rx.try_recv().unwrap().kind, CommandKind::Ack);
        assert_eq!(rx.try_recv().unwrap().kind, CommandKind::Publish);
        assert_eq!(rx.try_recv().unwrap().kind, CommandKind::Pong);
    }

    #[test]
    fn close_is_idempotent_and_disconnects_the_channel() {
        let (server, _client) = socket_pair();
        let (conn, rx) = Connection::new(server, 2).unwrap();

        conn.send(Command::ping());
        conn.close();
        conn.close();
        assert!(!conn.is_active());

        // Queued commands drain, then the channel reports disconnect.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_after_close_is_a_silent_drop() {
        let (server, _client) = socket_pair();
        let (conn, rx) = Connection::new(server, 2).unwrap();
        conn.close();
        conn.send(Command::ping());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn subscription_bookkeeping() {
        let (server, _client) = socket_pair();
        let (conn, _rx) = Connection::new(server, 2).unwrap();

        conn.track_subscription("orders");
        conn.track_subscription("events");
        conn.untrack_subscription("orders");

        let mut topics = conn.take_subscriptions();
        topics.sort();
        assert_eq!(topics, vec!["events"]);
        assert!(conn.take_subscriptions().is_empty());
    }
}
