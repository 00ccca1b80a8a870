//! Wire protocol types and binary codec.
//!
//! Two framings coexist and must not be confused:
//!
//! ```text
//! transport frame:  [u32 BE: body_len] [body_bytes]
//! command body:     [u8: kind] [u16 BE: topic_len] [topic_bytes]
//!                   [u32 BE: payload_len] [payload_bytes]
//! ```
//!
//! Command kinds:
//! - `0x01` CONNECT      — reserved, currently unused
//! - `0x02` PUBLISH      — C→B publish request / B→C push to subscriber
//! - `0x03` SUBSCRIBE    — C→B subscribe request
//! - `0x04` UNSUBSCRIBE  — C→B unsubscribe request
//! - `0x05` ACK          — B→C response; payload empty on success, error
//!                         text on failure
//! - `0x06` PING         — C→B keepalive
//! - `0x07` PONG         — B→C keepalive reply
//!
//! The message-id field on [`Command`] is a broker-side concern and is NOT
//! part of the wire encoding: it is always empty after decode and ignored
//! on encode.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Maximum transport frame size. Readers reject larger frames and close
/// the connection, since the stream cannot be resynchronized past a frame
/// that was never read.
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Maximum topic length in bytes, bounded by the u16 length prefix.
pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;

// ─── Command kinds and status codes ────────────────────────────────────────

/// Wire byte constants for the command kinds.
pub mod kind {
    pub const CONNECT: u8 = 0x01;
    pub const PUBLISH: u8 = 0x02;
    pub const SUBSCRIBE: u8 = 0x03;
    pub const UNSUBSCRIBE: u8 = 0x04;
    pub const ACK: u8 = 0x05;
    pub const PING: u8 = 0x06;
    pub const PONG: u8 = 0x07;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Connect,
    Publish,
    Subscribe,
    Unsubscribe,
    Ack,
    Ping,
    Pong,
}

impl CommandKind {
    pub fn as_byte(self) -> u8 {
        match self {
            CommandKind::Connect => kind::CONNECT,
            CommandKind::Publish => kind::PUBLISH,
            CommandKind::Subscribe => kind::SUBSCRIBE,
            CommandKind::Unsubscribe => kind::UNSUBSCRIBE,
            CommandKind::Ack => kind::ACK,
            CommandKind::Ping => kind::PING,
            CommandKind::Pong => kind::PONG,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            kind::CONNECT => Some(CommandKind::Connect),
            kind::PUBLISH => Some(CommandKind::Publish),
            kind::SUBSCRIBE => Some(CommandKind::Subscribe),
            kind::UNSUBSCRIBE => Some(CommandKind::Unsubscribe),
            kind::ACK => Some(CommandKind::Ack),
            kind::PING => Some(CommandKind::Ping),
            kind::PONG => Some(CommandKind::Pong),
            _ => None,
        }
    }
}

/// Response status. Not part of the wire encoding (the wire contract for
/// failures is an ACK whose payload carries the error text); handlers and
/// clients use it to tag commands in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusCode {
    #[default]
    Ok,
    Error,
    NotFound,
    InvalidRequest,
}

// ─── Command ───────────────────────────────────────────────────────────────

/// A decoded protocol command: one request, response, or push.
#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub topic: String,
    pub payload: Vec<u8>,
    /// Broker-side only; never crosses the wire.
    pub message_id: String,
    /// Response tag; never crosses the wire.
    pub status: StatusCode,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            topic: String::new(),
            payload: Vec::new(),
            message_id: String::new(),
            status: StatusCode::Ok,
        }
    }

    pub fn publish(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind: CommandKind::Publish,
            topic: topic.into(),
            payload,
            ..Self::new(CommandKind::Publish)
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::new(CommandKind::Subscribe)
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::new(CommandKind::Unsubscribe)
        }
    }

    /// Success acknowledgement: empty payload.
    pub fn ack(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::new(CommandKind::Ack)
        }
    }

    /// Failure acknowledgement: the error text rides in the payload.
    pub fn ack_error(topic: impl Into<String>, error: &str) -> Self {
        Self {
            topic: topic.into(),
            payload: error.as_bytes().to_vec(),
            status: StatusCode::Error,
            ..Self::new(CommandKind::Ack)
        }
    }

    pub fn ping() -> Self {
        Self::new(CommandKind::Ping)
    }

    pub fn pong() -> Self {
        Self::new(CommandKind::Pong)
    }

    /// True for ACK frames that report a failure.
    pub fn is_error_ack(&self) -> bool {
        self.kind == CommandKind::Ack && !self.payload.is_empty()
    }
}

// ─── Body codec ────────────────────────────────────────────────────────────

/// Encode a command body (without the transport length prefix).
pub fn encode(cmd: &Command) -> Result<Vec<u8>> {
    let topic = cmd.topic.as_bytes();
    if topic.len() > MAX_TOPIC_LEN {
        return Err(Error::InvalidRequest(format!(
            "topic too long: {} bytes",
            topic.len()
        )));
    }

    let mut buf = Vec::with_capacity(1 + 2 + topic.len() + 4 + cmd.payload.len());
    buf.push(cmd.kind.as_byte());
    buf.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    buf.extend_from_slice(topic);
    buf.extend_from_slice(&(cmd.payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&cmd.payload);
    Ok(buf)
}

/// Decode a command body. Strict: trailing bytes after the payload are a
/// length mismatch, not ignorable padding.
pub fn decode(data: &[u8]) -> Result<Command> {
    if data.len() < 3 {
        return Err(Error::InvalidRequest(format!(
            "command body too short: {} bytes",
            data.len()
        )));
    }

    let cmd_kind = CommandKind::from_byte(data[0]).ok_or_else(|| {
        Error::InvalidRequest(format!("unknown command kind: 0x{:02x}", data[0]))
    })?;

    let topic_len = u16::from_be_bytes([data[1], data[2]]) as usize;
    let topic_end = 3 + topic_len;
    if data.len() < topic_end + 4 {
        return Err(Error::InvalidRequest("truncated topic field".into()));
    }
    let topic = std::str::from_utf8(&data[3..topic_end])
        .map_err(|_| Error::InvalidRequest("topic is not valid UTF-8".into()))?
        .to_owned();

    let payload_len = u32::from_be_bytes([
        data[topic_end],
        data[topic_end + 1],
        data[topic_end + 2],
        data[topic_end + 3],
    ]) as usize;
    let payload_start = topic_end + 4;
    if data.len() - payload_start != payload_len {
        return Err(Error::InvalidRequest(format!(
            "payload length mismatch: declared {}, remaining {}",
            payload_len,
            data.len() - payload_start
        )));
    }

    Ok(Command {
        kind: cmd_kind,
        topic,
        payload: data[payload_start..].to_vec(),
        message_id: String::new(),
        status: StatusCode::Ok,
    })
}

// ─── Transport framing ─────────────────────────────────────────────────────

/// Write one length-prefixed frame.
pub fn write_frame(w: &mut impl Write, body: &[u8]) -> Result<()> {
    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(Error::InvalidRequest(format!(
            "frame too large: {} bytes",
            body.len()
        )));
    }
    w.write_all(&(body.len() as u32).to_be_bytes())?;
    w.write_all(body)?;
    w.flush()?;
    Ok(())
}

/// Read one length-prefixed frame. Rejects frames over [`MAX_FRAME_SIZE`];
/// callers must treat that as fatal for the stream.
pub fn read_frame(r: &mut impl Read) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(Error::InvalidRequest(format!("frame too large: {len} bytes")));
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body)?;
    Ok(body)
}

/// Encode and write one command as a transport frame.
pub fn write_command(w: &mut impl Write, cmd: &Command) -> Result<()> {
    write_frame(w, &encode(cmd)?)
}

/// Read and decode one command from a transport frame.
pub fn read_command(r: &mut impl Read) -> Result<Command> {
    decode(&read_frame(r)?)
}

// ─── Tests ─────────────────────────────────────────────────────────────────
