//! Configuration loading and validation.
//!
//! Layered: built-in defaults, then an optional YAML file, then
//! `FANOUT_*` environment overrides. `validate` runs before the listener
//! binds; a failure is fatal and exits non-zero.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::BrokerConfig;
use crate::error::{Error, Result};

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub broker: BrokerSection,
    pub network: NetworkSection,
    pub storage: StorageSection,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BrokerSection {
    pub max_topics: usize,
    pub default_queue_size: usize,
    pub message_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct NetworkSection {
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StorageSection {
    /// `memory` or `file`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Data directory for the `file` backend.
    pub path: PathBuf,
    /// Entry cap for the `memory` backend; 0 means unbounded.
    pub max_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9092,
            max_connections: 1000,
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            max_topics: 1000,
            default_queue_size: 1000,
            message_ttl_secs: 3600,
            cleanup_interval_secs: 60,
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            read_timeout_secs: 60,
            write_timeout_secs: 10,
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            path: PathBuf::from("fanout-data"),
            max_size: 100_000,
        }
    }
}

impl Config {
    /// Loads configuration: defaults, then the YAML file (if given and
    /// present), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&content)
                    .map_err(|err| Error::InvalidRequest(format!("config parse error: {err}")))?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("FANOUT_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(max) = std::env::var("FANOUT_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse::<usize>() {
                self.server.max_connections = max;
            }
        }

        // Accepts humantime strings ("100ms", "1h").
        if let Ok(ttl) = std::env::var("FANOUT_MESSAGE_TTL") {
            if let Ok(ttl) = humantime::parse_duration(&ttl) {
                self.broker.message_ttl_secs = ttl.as_secs().max(1);
            }
        }

        if let Ok(kind) = std::env::var("FANOUT_STORAGE_TYPE") {
            self.storage.kind = kind;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::InvalidRequest("server.port must be 1..=65535".into()));
        }
        if self.server.max_connections == 0 {
            return Err(Error::InvalidRequest(
                "server.max_connections must be > 0".into(),
            ));
        }
        if self.broker.default_queue_size == 0 {
            return Err(Error::InvalidRequest(
                "broker.default_queue_size must be > 0".into(),
            ));
        }
        if self.storage.kind != "memory" && self.storage.kind != "file" {
            return Err(Error::InvalidRequest(
                "storage.type must be memory or file".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.network.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.network.write_timeout_secs)
    }

    /// The broker-level slice of this configuration.
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_queue_size: self.broker.default_queue_size,
            max_topics: self.broker.max_topics,
            message_ttl: Duration::from_secs(self.broker.message_ttl_secs),
            cleanup_interval: Duration::from_secs(self.broker.cleanup_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 9092);
        assert_eq!(config.broker.default_queue_size, 1000);
        assert_eq!(config.storage.kind, "memory");
        assert_eq!(config.listen_addr(), "0.0.0.0:9092");
    }

    #[test]
    fn yaml_overrides_defaults() {
        let yaml = r#"
server:
  port: 7000
  max_connections: 5
broker:
  default_queue_size: 42
storage:
  type: file
  path: /tmp/fanout-test-data
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.max_connections, 5);
        assert_eq!(config.broker.default_queue_size, 42);
        assert_eq!(config.storage.kind, "file");
        // Untouched sections keep their defaults.
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.network.read_timeout_secs, 60);
    }

    #[test]
    fn load_reads_file_and_ignores_missing() {
        // Asserts against max_connections because the env-override test
        // mutates the other FANOUT_* variables in parallel.
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  max_connections: 7").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.max_connections, 7);

        let config = Config::load(Some(Path::new("/nonexistent/fanout.yml"))).unwrap();
        assert_eq!(config.server.max_connections, 1000);
    }

    #[test]
    fn validation_failures() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.broker.default_queue_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.kind = "tape".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("FANOUT_PORT", "7002");
        std::env::set_var("FANOUT_MESSAGE_TTL", "2h");
        std::env::set_var("FANOUT_STORAGE_TYPE", "file");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("FANOUT_PORT");
        std::env::remove_var("FANOUT_MESSAGE_TTL");
        std::env::remove_var("FANOUT_STORAGE_TYPE");

        assert_eq!(config.server.port, 7002);
        assert_eq!(config.broker.message_ttl_secs, 7200);
        assert_eq!(config.storage.kind, "file");
    }

    #[test]
    fn broker_config_carries_durations() {
        let config = Config::default();
        let broker = config.broker_config();
        assert_eq!(broker.message_ttl, Duration::from_secs(3600));
        assert_eq!(broker.cleanup_interval, Duration::from_secs(60));
        assert_eq!(broker.max_queue_size, 1000);
    }
}
