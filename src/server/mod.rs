//! TCP server: the accept loop and the connection registry.
//!
//! The accept loop runs on its own thread with a non-blocking listener so
//! it can observe the shutdown flag; each accepted socket gets a
//! [`Connection`] (reader + writer threads) wired to the shared command
//! handler.

pub mod connection;
pub mod handler;

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::broker::Broker;
use crate::constants::{ACCEPT_POLL_INTERVAL, READ_TIMEOUT, WRITE_TIMEOUT};
use crate::error::Result;

pub use connection::Connection;
pub use handler::Handler;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_connections: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

type ConnectionMap = Arc<Mutex<HashMap<String, Arc<Connection>>>>;

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<Handler>,
    connections: ConnectionMap,
    config: ServerConfig,
    shutdown: Arc<AtomicBool>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind the listener. The accept loop does not run until [`start`].
    ///
    /// [`start`]: Server::start
    pub fn bind(addr: &str, broker: Arc<Broker>, config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            handler: Arc::new(Handler::new(broker)),
            connections: Arc::new(Mutex::new(HashMap::new())),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            accept: Mutex::new(None),
        })
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Launch the accept loop thread.
    pub fn start(&self) -> Result<()> {
        let listener = self.listener.try_clone()?;
        listener.set_nonblocking(true)?;

        let handler = Arc::clone(&self.handler);
        let connections = Arc::clone(&self.connections);
        let shutdown = Arc::clone(&self.shutdown);
        let config = self.config.clone();
        let handle = thread::spawn(move || {
            accept_loop(&listener, &handler, &connections, &config, &shutdown);
        });
        *self.accept.lock().expect("accept handle poisoned") = Some(handle);
        log::info!("[server] listening on {}", self.local_addr);
        Ok(())
    }

    /// Stop accepting, then close every live connection.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.accept.lock().expect("accept handle poisoned").take() {
            let _ = handle.join();
        }

        let drained: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock().expect("connection registry poisoned");
            connections.drain().map(|(_, conn)| conn).collect()
        };
        for conn in drained {
            conn.close();
        }
        log::info!("[server] stopped");
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .expect("connection registry poisoned")
            .len()
    }
}

fn accept_loop(
    listener: &TcpListener,
    handler: &Arc<Handler>,
    connections: &ConnectionMap,
    config: &ServerConfig,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let live = {
                    let mut connections =
                        connections.lock().expect("connection registry poisoned");
                    // Dead connections linger in the registry until the next
                    // accept; prune them before counting against the cap.
                    connections.retain(|_, conn| conn.is_active());
                    connections.len()
                };
                if live >= config.max_connections {
                    log::warn!(
                        "[server] refusing {addr}: connection limit {} reached",
                        config.max_connections
                    );
                    continue;
                }

                match Connection::spawn(
                    stream,
                    Arc::clone(handler),
                    config.read_timeout,
                    config.write_timeout,
                ) {
                    Ok(conn) => {
                        log::info!("[server] client connected: {}", conn.id);
                        connections
                            .lock()
                            .expect("connection registry poisoned")
                            .insert(conn.id.clone(), conn);
                    }
                    Err(err) => {
                        log::warn!("[server] failed to set up connection from {addr}: {err}");
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                log::warn!("[server] accept error: {err}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use crate::protocol::{self, Command, CommandKind};
    use std::net::TcpStream;

    fn start_server(config: ServerConfig) -> (Arc<Broker>, Server) {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));
        let server = Server::bind("127.0.0.1:0", Arc::clone(&broker), config).unwrap();
        server.start().unwrap();
        (broker, server)
    }

    fn connect(server: &Server) -> TcpStream {
        let stream = TcpStream::connect(server.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream
    }

    #[test]
    fn ping_pong_round_trip() {
        let (broker, server) = start_server(ServerConfig::default());
        let mut stream = connect(&server);

        protocol::write_command(&mut stream, &Command::ping()).unwrap();
        let reply = protocol::read_command(&mut stream).unwrap();
        assert_eq!(reply.kind, CommandKind::Pong);

        server.stop();
        broker.stop();
    }

    #[test]
    fn malformed_body_does_not_kill_the_connection() {
        let (broker, server) = start_server(ServerConfig::default());
        let mut stream = connect(&server);

        // Unknown kind byte inside a well-formed transport frame.
        protocol::write_frame(&mut stream, &[0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]).unwrap();
        protocol::write_command(&mut stream, &Command::ping()).unwrap();
        let reply = protocol::read_command(&mut stream).unwrap();
        assert_eq!(reply.kind, CommandKind::Pong);

        server.stop();
        broker.stop();
    }

    #[test]
    fn connection_limit_refuses_extra_clients() {
        let (broker, server) = start_server(ServerConfig {
            max_connections: 1,
            ..ServerConfig::default()
        });

        let mut first = connect(&server);
        protocol::write_command(&mut first, &Command::ping()).unwrap();
        assert_eq!(
            protocol::read_command(&mut first).unwrap().kind,
            CommandKind::Pong
        );

        // The second socket is accepted by the OS but refused by the
        // server: it sees a dead connection instead of a PONG. The write
        // may already fail if the reset beats it.
        let mut second = connect(&server);
        let _ = protocol::write_command(&mut second, &Command::ping());
        assert!(protocol::read_command(&mut second).is_err());

        server.stop();
        broker.stop();
    }

    #[test]
    fn stop_closes_live_connections() {
        let (broker, server) = start_server(ServerConfig::default());
        let mut stream = connect(&server);

        protocol::write_command(&mut stream, &Command::ping()).unwrap();
        assert_eq!(
            protocol::read_command(&mut stream).unwrap().kind,
            CommandKind::Pong
        );

        server.stop();
        broker.stop();

        // The peer observes the close as EOF.
        assert!(protocol::read_command(&mut stream).is_err());
    }
}
