//! Command dispatch: translates decoded commands into broker calls and
//! pushes the responses back on the owning connection.
//!
//! Every SUBSCRIBE also spawns a delivery thread that pulls messages out
//! of the subscription buffer and forwards them to the client as PUBLISH
//! frames. The thread tears itself down when the subscription closes
//! (unsubscribe, topic deletion, broker shutdown) or the connection dies.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::RecvTimeoutError;
use uuid::Uuid;

use crate::broker::Broker;
use crate::constants::DELIVERY_WAIT;
use crate::message::Message;
use crate::protocol::{Command, CommandKind};
use crate::subscription::Subscription;

use super::connection::Connection;

pub struct Handler {
    broker: Arc<Broker>,
}

impl Handler {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    pub fn handle(&self, conn: &Arc<Connection>, cmd: Command) {
        match cmd.kind {
            CommandKind::Publish => self.handle_publish(conn, cmd),
            CommandKind::Subscribe => self.handle_subscribe(conn, cmd),
            CommandKind::Unsubscribe => self.handle_unsubscribe(conn, cmd),
            CommandKind::Ping => conn.send(Command::pong()),
            // CONNECT is reserved; ACK/PONG have no client→broker meaning.
            other => {
                log::debug!("[handler] ignoring {other:?} from {}", conn.id);
            }
        }
    }

    fn handle_publish(&self, conn: &Arc<Connection>, cmd: Command) {
        let msg = Message::new(Uuid::new_v4().to_string(), cmd.topic.clone(), cmd.payload);
        match self.broker.publish(&cmd.topic, msg) {
            Ok(()) => conn.send(Command::ack(cmd.topic)),
            Err(err) => {
                log::warn!("[handler] publish to {:?} failed: {err}", cmd.topic);
                conn.send(Command::ack_error(cmd.topic, &err.to_string()));
            }
        }
    }

    fn handle_subscribe(&self, conn: &Arc<Connection>, cmd: Command) {
        match self.broker.subscribe(&cmd.topic, &conn.id) {
            Ok(sub) => {
                conn.track_subscription(&cmd.topic);
                // The ACK is enqueued before the delivery thread starts, so
                // on one connection it always precedes the first push.
                conn.send(Command::ack(cmd.topic));
                let conn = Arc::clone(conn);
                thread::spawn(move || delivery_loop(&sub, &conn));
            }
            Err(err) => {
                log::warn!("[handler] subscribe to {:?} failed: {err}", cmd.topic);
                conn.send(Command::ack_error(cmd.topic, &err.to_string()));
            }
        }
    }

    fn handle_unsubscribe(&self, conn: &Arc<Connection>, cmd: Command) {
        self.broker
            .unsubscribe(&format!("{}-{}", conn.id, cmd.topic));
        conn.untrack_subscription(&cmd.topic);
        conn.send(Command::ack(cmd.topic));
    }

    /// Detach everything the connection subscribed to. Called once by the
    /// reader thread after the connection closes; the delivery threads see
    /// their subscriptions close and exit.
    pub fn connection_closed(&self, conn: &Arc<Connection>) {
        for topic in conn.take_subscriptions() {
            self.broker.unsubscribe(&format!("{}-{topic}", conn.id));
        }
    }
}

/// Forward buffered messages to the subscriber as PUBLISH frames until the
/// subscription or the connection goes away.
fn delivery_loop(sub: &Arc<Subscription>, conn: &Arc<Connection>) {
    loop {
        match sub.recv_timeout(DELIVERY_WAIT) {
            Ok(msg) => {
                conn.send(Command::publish(msg.topic.clone(), msg.payload.clone()));
            }
            Err(RecvTimeoutError::Timeout) => {
                if !sub.is_active() || !conn.is_active() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("[handler] delivery for {} finished", sub.id);
}
