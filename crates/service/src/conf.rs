//! Declarative configuration: a TOML file plus environment overrides.
//!
//! The file layout mirrors the deployed `rabbitid.toml`:
//!
//! ```toml
//! [server]
//! addr = "127.0.0.1:8080"
//!
//! [store]
//! type = "redis"            # redis | etcd | zk
//! uri = "127.0.0.1:6379"    # comma-separated for cluster backends
//! min_second = 300
//! max_second = 1800
//!
//! [generate]
//! dataCenter = 0
//! step = 1000
//!
//! [log]
//! level = "info"
//! path = ""                 # empty: stderr
//! ```
//!
//! Environment variables override the file: `RABBITID_ADDRESS`,
//! `RABBITID_STORE`, `RABBITID_STORE_URI`, `RABBITID_DATA_CENTER`,
//! `RABBITID_STEP`. Unparsable overrides are ignored in favour of the file
//! value.

use rabbitid_segment::DATA_CENTER_MASK;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_REDIS_URI: &str = "127.0.0.1:6379";
const DEFAULT_ETCD_URI: &str = "127.0.0.1:2379";
const DEFAULT_ZK_URI: &str = "127.0.0.1:2181";
const DEFAULT_STEP: i64 = 1000;
const DEFAULT_MIN_SECOND: u64 = 300;
const DEFAULT_MAX_SECOND: u64 = 1800;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("data center {0} does not fit in 4 bits")]
    DataCenterOutOfRange(u8),

    #[error("step must be positive, got {0}")]
    NonPositiveStep(i64),
}

/// Which coordinator backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    #[default]
    Redis,
    Etcd,
    Zk,
}

impl FromStr for StoreType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redis" => Ok(Self::Redis),
            "etcd" => Ok(Self::Etcd),
            "zk" => Ok(Self::Zk),
            _ => Err(()),
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redis => write!(f, "redis"),
            Self::Etcd => write!(f, "etcd"),
            Self::Zk => write!(f, "zk"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub generate: GenerateConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "type", default)]
    pub kind: StoreType,
    /// Backend endpoint(s); empty picks the backend's conventional local
    /// address.
    #[serde(default)]
    pub uri: String,
    #[serde(default = "default_min_second")]
    pub min_second: u64,
    #[serde(default = "default_max_second")]
    pub max_second: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreType::default(),
            uri: String::new(),
            min_second: default_min_second(),
            max_second: default_max_second(),
        }
    }
}

impl StoreConfig {
    /// Endpoint(s) to dial, falling back to the backend's default port.
    pub fn uri(&self) -> &str {
        if !self.uri.is_empty() {
            return &self.uri;
        }
        match self.kind {
            StoreType::Redis => DEFAULT_REDIS_URI,
            StoreType::Etcd => DEFAULT_ETCD_URI,
            StoreType::Zk => DEFAULT_ZK_URI,
        }
    }

    /// Lower adaptive-batching threshold.
    pub fn min_buffer_time(&self) -> Duration {
        Duration::from_secs(self.min_second)
    }

    /// Upper adaptive-batching threshold.
    pub fn max_buffer_time(&self) -> Duration {
        Duration::from_secs(self.max_second)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateConfig {
    #[serde(rename = "dataCenter", default)]
    pub data_center: u8,
    #[serde(default = "default_step")]
    pub step: i64,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            data_center: 0,
            step: default_step(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path; empty writes to stderr.
    #[serde(default)]
    pub path: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: String::new(),
        }
    }
}

impl Config {
    /// Parses a TOML document. No environment overrides are applied.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the TOML file at `path`, applies environment overrides, and
    /// validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overrides file values from the environment. Missing or unparsable
    /// variables leave the file value in place.
    pub(crate) fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("RABBITID_ADDRESS") {
            self.server.addr = addr;
        }
        if let Ok(kind) = std::env::var("RABBITID_STORE") {
            if let Ok(kind) = kind.parse() {
                self.store.kind = kind;
            }
        }
        if let Ok(uri) = std::env::var("RABBITID_STORE_URI") {
            self.store.uri = uri;
        }
        if let Ok(dc) = std::env::var("RABBITID_DATA_CENTER") {
            if let Ok(dc) = dc.parse() {
                self.generate.data_center = dc;
            }
        }
        if let Ok(step) = std::env::var("RABBITID_STEP") {
            if let Ok(step) = step.parse() {
                self.generate.step = step;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if i64::from(self.generate.data_center) > DATA_CENTER_MASK {
            return Err(ConfigError::DataCenterOutOfRange(self.generate.data_center));
        }
        if self.generate.step <= 0 {
            return Err(ConfigError::NonPositiveStep(self.generate.step));
        }
        Ok(())
    }
}

fn default_addr() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_min_second() -> u64 {
    DEFAULT_MIN_SECOND
}

fn default_max_second() -> u64 {
    DEFAULT_MAX_SECOND
}

fn default_step() -> i64 {
    DEFAULT_STEP
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.addr, DEFAULT_ADDR);
        assert_eq!(config.store.kind, StoreType::Redis);
        assert_eq!(config.store.uri(), DEFAULT_REDIS_URI);
        assert_eq!(config.store.min_buffer_time(), Duration::from_secs(300));
        assert_eq!(config.store.max_buffer_time(), Duration::from_secs(1800));
        assert_eq!(config.generate.data_center, 0);
        assert_eq!(config.generate.step, DEFAULT_STEP);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_full_document() {
        let config = Config::from_toml(
            r#"
            [server]
            addr = "0.0.0.0:9001"

            [store]
            type = "etcd"
            uri = "10.0.0.1:2379,10.0.0.2:2379"
            min_second = 60
            max_second = 600

            [generate]
            dataCenter = 3
            step = 500

            [log]
            level = "debug"
            path = "/var/log/rabbitid.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.addr, "0.0.0.0:9001");
        assert_eq!(config.store.kind, StoreType::Etcd);
        assert_eq!(config.store.uri(), "10.0.0.1:2379,10.0.0.2:2379");
        assert_eq!(config.store.min_second, 60);
        assert_eq!(config.generate.data_center, 3);
        assert_eq!(config.generate.step, 500);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.path, "/var/log/rabbitid.log");
    }

    #[test]
    fn test_uri_defaults_follow_store_type() {
        let etcd = Config::from_toml("[store]\ntype = \"etcd\"\n").unwrap();
        assert_eq!(etcd.store.uri(), DEFAULT_ETCD_URI);
        let zk = Config::from_toml("[store]\ntype = \"zk\"\n").unwrap();
        assert_eq!(zk.store.uri(), DEFAULT_ZK_URI);
    }

    #[test]
    fn test_data_center_must_fit_four_bits() {
        let err = Config::from_toml("[generate]\ndataCenter = 16\n").unwrap_err();
        assert!(matches!(err, ConfigError::DataCenterOutOfRange(16)));
    }

    #[test]
    fn test_step_must_be_positive() {
        let err = Config::from_toml("[generate]\nstep = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveStep(0)));
    }

    #[test]
    fn test_unknown_store_type_is_rejected() {
        assert!(Config::from_toml("[store]\ntype = \"consul\"\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("RABBITID_ADDRESS", "0.0.0.0:7777");
        std::env::set_var("RABBITID_STORE", "zk");
        std::env::set_var("RABBITID_DATA_CENTER", "9");
        std::env::set_var("RABBITID_STEP", "not-a-number");

        let mut config = Config::default();
        config.apply_env();

        std::env::remove_var("RABBITID_ADDRESS");
        std::env::remove_var("RABBITID_STORE");
        std::env::remove_var("RABBITID_DATA_CENTER");
        std::env::remove_var("RABBITID_STEP");

        assert_eq!(config.server.addr, "0.0.0.0:7777");
        assert_eq!(config.store.kind, StoreType::Zk);
        assert_eq!(config.generate.data_center, 9);
        // Garbage keeps the file value.
        assert_eq!(config.generate.step, DEFAULT_STEP);
    }
}
