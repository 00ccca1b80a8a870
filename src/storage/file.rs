//! Append-only file-backed message store.
//!
//! Messages are appended to `messages.log` as one JSON record per line,
//! self-describing and greppable. Reads scan the log; for the same id the
//! latest record wins.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::message::Message;

use super::MessageStore;

const LOG_FILE: &str = "messages.log";

pub struct FileStore {
    dir: PathBuf,
    /// Append handle; one writer at a time.
    log: Mutex<File>,
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))?;
        Ok(Self {
            dir,
            log: Mutex::new(log),
        })
    }

    fn scan<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(Message),
    {
        let path = self.dir.join(LOG_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(&line) {
                Ok(msg) => visit(msg),
                Err(err) => {
                    // A torn write at the tail must not poison the whole log.
                    log::warn!("[storage] skipping unreadable record: {err}");
                }
            }
        }
        Ok(())
    }
}

impl MessageStore for FileStore {
    fn store(&self, msg: &Message) -> Result<()> {
        msg.validate()?;
        let record = serde_json::to_string(msg)
            .map_err(|err| Error::InvalidMessage(format!("unencodable message: {err}")))?;
        let mut log = self.log.lock().expect("storage log mutex poisoned");
        log.write_all(record.as_bytes())?;
        log.write_all(b"\n")?;
        log.flush()?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Message>> {
        let mut found = None;
        self.scan(|msg| {
            if msg.id == id {
                found = Some(msg);
            }
        })?;
        Ok(found)
    }

    fn list(&self, topic: &str) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        self.scan(|msg| {
            if msg.topic == topic {
                out.push(msg);
            }
        })?;
        Ok(out)
    }

    /// TODO: compaction. Expired records are currently only filtered on
    /// read; the log itself is never rewritten.
    fn remove_expired(&self, _ttl: Duration) -> Result<usize> {
        Ok(0)
    }
}
