//! Configuration file
//!
//! YAML layout:
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 8080
//! streams:
//!   nasatv: https://example.com/live/master.m3u8
//!   other:
//!     url: https://example.com/other.m3u8
//!     content_type: video/MP2T
//! options:
//!   user_agent: StreamPipe/1.0
//!   threads: 4
//!   timeout: 20.0
//!   buffer_size: 8388608
//! relay:
//!   capacity: 16777216
//!   stop_timeout: 5.0
//!   slow_reader_max_lag: 8388608   # omit to block on the slowest reader
//!   align_ts_packets: true
//! downloader:
//!   program: streamlink
//!   quality: best
//!   extra_args: []
//! ```
//!
//! Every section is optional. Values are checked once at load time.

use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::buffer::{BackpressurePolicy, DEFAULT_CAPACITY};
use crate::producer::{ProducerOptions, StreamlinkSource};
use crate::registry::{validate_stream_name, RegistryConfig, StreamDefinition};
use crate::server::ServerConfig;

/// Error loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML for this layout
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `server` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// One entry of the `streams` map: a bare URL or a detailed mapping
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StreamEntry {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        content_type: Option<String>,
    },
}

impl StreamEntry {
    /// Source URL of the stream
    pub fn url(&self) -> &str {
        match self {
            StreamEntry::Url(url) => url,
            StreamEntry::Detailed { url, .. } => url,
        }
    }

    /// Content type override, if any
    pub fn content_type(&self) -> Option<&str> {
        match self {
            StreamEntry::Url(_) => None,
            StreamEntry::Detailed { content_type, .. } => content_type.as_deref(),
        }
    }
}

/// `options` section, handed to every producer start
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    pub user_agent: String,
    pub threads: u32,
    /// Seconds
    pub timeout: f64,
    pub buffer_size: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        let defaults = ProducerOptions::default();
        Self {
            user_agent: defaults.user_agent,
            threads: defaults.threads,
            timeout: defaults.timeout.as_secs_f64(),
            buffer_size: defaults.buffer_size,
        }
    }
}

/// `relay` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub capacity: usize,
    /// Seconds
    pub stop_timeout: f64,
    /// Evict readers this many bytes behind; `None` blocks the producer instead
    pub slow_reader_max_lag: Option<usize>,
    pub align_ts_packets: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            stop_timeout: 5.0,
            slow_reader_max_lag: None,
            align_ts_packets: true,
        }
    }
}

/// `downloader` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloaderSettings {
    pub program: String,
    pub quality: String,
    pub extra_args: Vec<String>,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            program: "streamlink".to_string(),
            quality: "best".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: HttpSettings,
    /// `None` when the key is present but empty
    pub streams: Option<BTreeMap<String, StreamEntry>>,
    pub options: ProducerSettings,
    pub relay: RelaySettings,
    pub downloader: DownloaderSettings,
}

impl AppConfig {
    /// Load and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&contents)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check every value, reporting the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        let options = &self.options;
        if options.threads == 0 {
            return Err(invalid("options.threads must be greater than 0"));
        }
        if !(options.timeout.is_finite() && options.timeout > 0.0) {
            return Err(invalid("options.timeout must be a positive number of seconds"));
        }
        if options.buffer_size == 0 {
            return Err(invalid("options.buffer_size must be greater than 0"));
        }

        let relay = &self.relay;
        if relay.capacity == 0 {
            return Err(invalid("relay.capacity must be greater than 0"));
        }
        if !(relay.stop_timeout.is_finite() && relay.stop_timeout > 0.0) {
            return Err(invalid("relay.stop_timeout must be a positive number of seconds"));
        }
        if let Some(max_lag) = relay.slow_reader_max_lag {
            if max_lag == 0 || max_lag > relay.capacity {
                return Err(invalid(format!(
                    "relay.slow_reader_max_lag must be between 1 and relay.capacity ({})",
                    relay.capacity
                )));
            }
        }

        if self.downloader.program.trim().is_empty() {
            return Err(invalid("downloader.program must not be empty"));
        }

        for (name, entry) in self.streams() {
            if validate_stream_name(name).is_err() {
                return Err(invalid(format!(
                    "stream name {name:?} must contain only lowercase letters, digits and '-'"
                )));
            }
            if entry.url().trim().is_empty() {
                return Err(invalid(format!("stream {name:?} has no url")));
            }
            if entry.content_type().is_some_and(|ct| ct.trim().is_empty()) {
                return Err(invalid(format!("stream {name:?} has an empty content_type")));
            }
        }

        Ok(())
    }

    /// Override the bind host
    pub fn host(mut self, host: Option<String>) -> Self {
        if let Some(host) = host {
            self.server.host = host;
        }
        self
    }

    /// Override the bind port
    pub fn port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.server.port = port;
        }
        self
    }

    /// Configured streams, sorted by name
    pub fn streams(&self) -> impl Iterator<Item = (&String, &StreamEntry)> {
        self.streams.iter().flatten()
    }

    /// Number of configured streams
    pub fn stream_count(&self) -> usize {
        self.streams.as_ref().map_or(0, |s| s.len())
    }

    /// Stream definitions for the registry
    pub fn stream_definitions(&self) -> Result<Vec<StreamDefinition>, ConfigError> {
        self.streams()
            .map(|(name, entry)| {
                let def = StreamDefinition::new(name.clone(), entry.url())
                    .map_err(|e| invalid(e.to_string()))?;
                Ok(match entry.content_type() {
                    Some(ct) => def.with_content_type(ct),
                    None => def,
                })
            })
            .collect()
    }

    /// Options handed to each producer start
    pub fn producer_options(&self) -> Result<ProducerOptions, ConfigError> {
        Ok(ProducerOptions::default()
            .user_agent(self.options.user_agent.clone())
            .threads(self.options.threads)
            .timeout(seconds("options.timeout", self.options.timeout)?)
            .buffer_size(self.options.buffer_size))
    }

    /// Registry and relay buffer settings
    pub fn registry_config(&self) -> Result<RegistryConfig, ConfigError> {
        let policy = match self.relay.slow_reader_max_lag {
            Some(max_lag) => BackpressurePolicy::DropSlowReader { max_lag },
            None => BackpressurePolicy::Block,
        };

        Ok(RegistryConfig::default()
            .buffer_capacity(self.relay.capacity)
            .backpressure(policy)
            .stop_timeout(seconds("relay.stop_timeout", self.relay.stop_timeout)?)
            .align_ts_packets(self.relay.align_ts_packets))
    }

    /// Streamlink producer source
    pub fn streamlink_source(&self) -> StreamlinkSource {
        StreamlinkSource::new()
            .with_program(self.downloader.program.clone())
            .with_quality(self.downloader.quality.clone())
            .with_extra_args(self.downloader.extra_args.clone())
    }

    /// HTTP server settings, resolving the bind host
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let addr: SocketAddr = (self.server.host.as_str(), self.server.port)
            .to_socket_addrs()
            .map_err(|e| invalid(format!("cannot resolve host {:?}: {}", self.server.host, e)))?
            .next()
            .ok_or_else(|| invalid(format!("host {:?} has no addresses", self.server.host)))?;

        Ok(ServerConfig::with_addr(addr))
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn seconds(key: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| invalid(format!("{key} is out of range: {value}")))
}
