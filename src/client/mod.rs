//! Client library for talking to a fanout broker.
//!
//! [`Client`] owns one blocking TCP connection with retrying connect;
//! [`Producer`] and [`Consumer`] wrap it with the publish and subscribe
//! workflows. Request/response pairing is serialized through a mutex, so
//! a producer can be shared across threads.

pub mod consumer;
pub mod producer;

use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::constants::{CLIENT_READ_TIMEOUT, CLIENT_WRITE_TIMEOUT};
use crate::protocol::{self, Command};

pub use consumer::Consumer;
pub use producer::Producer;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection attempts before giving up.
    pub retry_max: u32,
    /// Base backoff; doubles per attempt.
    pub retry_interval: Duration,
    /// Per-attempt connect deadline.
    pub conn_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_max: 5,
            retry_interval: Duration::from_secs(1),
            conn_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Client {
    config: ClientConfig,
    stream: Option<TcpStream>,
    addr: String,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            stream: None,
            addr: String::new(),
        }
    }

    /// Connect with exponential backoff: `retry_interval * 2^attempt`
    /// between attempts, up to `retry_max` attempts.
    pub fn connect(&mut self, addr: &str) -> Result<()> {
        self.addr = addr.to_owned();
        let socket_addr = addr
            .to_socket_addrs()
            .with_context(|| format!("resolve {addr}"))?
            .next()
            .with_context(|| format!("no address for {addr}"))?;

        let mut last_err = None;
        for attempt in 0..self.config.retry_max {
            log::debug!(
                "[client] connecting to {addr} (attempt {}/{})",
                attempt + 1,
                self.config.retry_max
            );
            match TcpStream::connect_timeout(&socket_addr, self.config.conn_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;
                    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))?;
                    self.stream = Some(stream);
                    log::info!("[client] connected to {addr}");
                    return Ok(());
                }
                Err(err) => {
                    let backoff = self.config.retry_interval * 2u32.pow(attempt);
                    log::warn!("[client] connect to {addr} failed: {err}; retrying in {backoff:?}");
                    last_err = Some(err);
                    thread::sleep(backoff);
                }
            }
        }
        bail!(
            "failed to connect to {addr} after {} attempts: {}",
            self.config.retry_max,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )
    }

    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            log::info!("[client] disconnected from {}", self.addr);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Encode and send one command.
    pub fn send_command(&mut self, cmd: &Command) -> Result<()> {
        let stream = self.stream.as_mut().context("not connected")?;
        protocol::write_command(stream, cmd)
            .with_context(|| format!("send {:?}", cmd.kind))?;
        Ok(())
    }

    /// Read and decode one command (response or push).
    pub fn read_command(&mut self) -> Result<Command> {
        let stream = self.stream.as_mut().context("not connected")?;
        let cmd = protocol::read_command(stream).context("read response")?;
        Ok(cmd)
    }

    /// A second handle on the underlying socket, for a reader loop that
    /// runs while the primary handle keeps sending.
    pub(crate) fn clone_stream(&self) -> Result<TcpStream> {
        let stream = self.stream.as_ref().context("not connected")?;
        Ok(stream.try_clone()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_gives_up_after_retry_max() {
        let mut client = Client::new(ClientConfig {
            retry_max: 2,
            retry_interval: Duration::from_millis(10),
            conn_timeout: Duration::from_millis(100),
        });
        // Reserved port with nothing listening.
        let err = client.connect("127.0.0.1:1").unwrap_err();
        assert!(err.to_string().contains("after 2 attempts"));
        assert!(!client.is_connected());
    }

    #[test]
    fn send_without_connect_fails() {
        let mut client = Client::new(ClientConfig::default());
        assert!(client.send_command(&Command::ping()).is_err());
        assert!(client.read_command().is_err());
    }
}
