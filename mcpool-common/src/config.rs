//! # Pool Configuration
//!
//! Purpose: Describe the shards a pool manager connects to, how many
//! connections each shard keeps, and the timeouts applied while acquiring
//! and using them.
//!
//! ## Usage Notes
//!
//! - Build `PoolConfig` directly, or load it with `PoolConfig::from_json_str`.
//! - Parallelism is global: every shard gets the same pool capacity.
//! - JSON durations are integer milliseconds (`acquire_timeout_ms`, ...).
//!
//! ```text
//! {
//!   "parallelism": 2,
//!   "acquire_timeout_ms": 5000,
//!   "shards": [
//!     { "name": "mem1", "network": "tcp", "host": "127.0.0.1", "port": "11211" }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{McError, McResult};

/// Default wait for a connection before an operation gives up.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for the transport to come up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-shard pool capacity.
pub const DEFAULT_PARALLELISM: usize = 2;

/// Transport family used to reach a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// TCP over whichever address family the host resolves to.
    Tcp,
    /// TCP restricted to IPv4 addresses.
    Tcp4,
    /// TCP restricted to IPv6 addresses.
    Tcp6,
    /// Unix-domain stream socket; the host is the socket path.
    Unix,
}

impl Network {
    /// Returns the lowercase family name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Unix => "unix",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = McError;

    fn from_str(s: &str) -> McResult<Self> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "unix" => Ok(Network::Unix),
            other => Err(McError::invalid_config(format!(
                "unknown network family: {other}"
            ))),
        }
    }
}

/// One independently addressed cache backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Name unique within one pool manager.
    pub name: String,
    /// Transport family.
    pub network: Network,
    /// Host name, IP literal, or socket path for `Network::Unix`.
    pub host: String,
    /// Port as text; ignored for `Network::Unix`.
    #[serde(default)]
    pub port: String,
}

impl ShardConfig {
    /// Creates a TCP shard descriptor.
    pub fn tcp(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        ShardConfig {
            name: name.into(),
            network: Network::Tcp,
            host: host.into(),
            port: port.to_string(),
        }
    }

    /// Returns the dial address: `host:port`, or the bare path for unix sockets.
    pub fn address(&self) -> String {
        match self.network {
            Network::Unix => self.host.clone(),
            _ if self.host.contains(':') && !self.host.starts_with('[') => {
                format!("[{}]:{}", self.host, self.port)
            }
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

/// Configuration consumed by `PoolManager::initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections opened per shard; also the per-shard concurrency cap.
    pub parallelism: usize,
    /// Shards in configuration order.
    pub shards: Vec<ShardConfig>,
    /// Longest time an operation waits for a pooled connection.
    ///
    /// A timeout too large to add to the current instant, such as
    /// `Duration::MAX`, waits without a deadline.
    pub acquire_timeout: Duration,
    /// Optional bound on establishing each TCP transport. Unix socket
    /// connects do not honor it.
    pub connect_timeout: Option<Duration>,
    /// Optional socket read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional socket write timeout.
    pub write_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            parallelism: DEFAULT_PARALLELISM,
            shards: Vec::new(),
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Creates a config for the given shards with default timeouts.
    pub fn new(parallelism: usize, shards: Vec<ShardConfig>) -> Self {
        PoolConfig {
            parallelism,
            shards,
            ..PoolConfig::default()
        }
    }

    /// Parses a JSON document and validates it.
    pub fn from_json_str(input: &str) -> McResult<Self> {
        let raw: RawPoolConfig =
            serde_json::from_str(input).map_err(|err| McError::invalid_config(err.to_string()))?;
        let config = PoolConfig::from(raw);
        config.validate()?;
        Ok(config)
    }

    /// Rejects configs a pool manager cannot be built from.
    pub fn validate(&self) -> McResult<()> {
        if self.parallelism == 0 {
            return Err(McError::invalid_config("parallelism must be at least 1"));
        }
        if self.shards.is_empty() {
            return Err(McError::invalid_config("no shards configured"));
        }
        let mut seen = HashSet::with_capacity(self.shards.len());
        for shard in &self.shards {
            if shard.name.is_empty() {
                return Err(McError::invalid_config("shard name must not be empty"));
            }
            if !seen.insert(shard.name.as_str()) {
                return Err(McError::invalid_config(format!(
                    "duplicate shard name: {}",
                    shard.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawPoolConfig {
    #[serde(default = "default_parallelism")]
    parallelism: usize,
    shards: Vec<ShardConfig>,
    #[serde(default)]
    acquire_timeout_ms: Option<u64>,
    #[serde(default)]
    connect_timeout_ms: Option<u64>,
    #[serde(default)]
    read_timeout_ms: Option<u64>,
    #[serde(default)]
    write_timeout_ms: Option<u64>,
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

impl From<RawPoolConfig> for PoolConfig {
    fn from(raw: RawPoolConfig) -> Self {
        PoolConfig {
            parallelism: raw.parallelism,
            shards: raw.shards,
            acquire_timeout: raw
                .acquire_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT),
            connect_timeout: Some(
                raw.connect_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            ),
            read_timeout: raw.read_timeout_ms.map(Duration::from_millis),
            write_timeout: raw.write_timeout_ms.map(Duration::from_millis),
        }
    }
}
