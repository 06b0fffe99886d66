// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Proxy configuration
//!
//! Layered as defaults, then an optional YAML file, then `TRANSPORT_PROXY_*`
//! environment variables. The daemon applies command-line overrides last
//! and calls [`ProxyConfig::validate`].

use crate::error::ConfigError;
use crate::transport::ListenAddr;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SOCKET: &str = "/tmp/transport-proxy.sock";
const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:12389";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_ADB_TIMEOUT_MS: u64 = 5000;
const DEFAULT_LOG_LEVEL: &str = "info";

pub const ENV_CONFIG_FILE: &str = "TRANSPORT_PROXY_CONFIG_FILE";
const ENV_TRANSPORT_MODE: &str = "TRANSPORT_PROXY_TRANSPORT_MODE";
const ENV_LISTEN_ADDR: &str = "TRANSPORT_PROXY_LISTEN_ADDR";
const ENV_SOCKET: &str = "TRANSPORT_PROXY_SOCKET";
const ENV_UPSTREAM: &str = "TRANSPORT_PROXY_UPSTREAM";
const ENV_ADB_ADDR: &str = "TRANSPORT_PROXY_ADB_ADDR";
const ENV_DEVICE_SERIAL: &str = "TRANSPORT_PROXY_DEVICE_SERIAL";
const ENV_POLL_INTERVAL_MS: &str = "TRANSPORT_PROXY_POLL_INTERVAL_MS";
const ENV_ADB_TIMEOUT_MS: &str = "TRANSPORT_PROXY_ADB_TIMEOUT_MS";
const ENV_LOG_LEVEL: &str = "TRANSPORT_PROXY_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Tcp,
    Unix,
}

impl FromStr for TransportMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(TransportMode::Tcp),
            "unix" => Ok(TransportMode::Unix),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// How subscribers reach the proxy: "tcp" or "unix"
    pub transport_mode: TransportMode,

    /// Listen address (TCP mode only)
    pub listen_addr: SocketAddr,

    /// Socket path (Unix socket mode only)
    pub socket: PathBuf,

    /// Upstream transport endpoint, `http://host:port` or `unix:///path`
    pub upstream: String,

    /// ADB server address
    pub adb_addr: SocketAddr,

    /// Device to bridge; the first online device when unset
    pub device_serial: Option<String>,

    pub poll_interval_ms: u64,

    /// Socket timeout for every ADB query
    pub adb_timeout_ms: u64,

    pub log_level: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            transport_mode: TransportMode::default(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 12390)),
            socket: PathBuf::from(DEFAULT_SOCKET),
            upstream: DEFAULT_UPSTREAM.to_string(),
            adb_addr: SocketAddr::from(([127, 0, 0, 1], 5037)),
            device_serial: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            adb_timeout_ms: DEFAULT_ADB_TIMEOUT_MS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ProxyConfig {
    /// Defaults, then `path` (or the file named by `TRANSPORT_PROXY_CONFIG_FILE`),
    /// then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = env::var(ENV_CONFIG_FILE).ok().map(PathBuf::from);
        let mut config = match path.or(from_env.as_deref()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents, &path.display().to_string())
    }

    pub fn from_yaml(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Override fields from `TRANSPORT_PROXY_*` variables. The log level
    /// falls back to `RUST_LOG`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(mode) = Self::parse_env(ENV_TRANSPORT_MODE)? {
            self.transport_mode = mode;
        }
        if let Some(addr) = Self::parse_env(ENV_LISTEN_ADDR)? {
            self.listen_addr = addr;
        }
        if let Ok(socket) = env::var(ENV_SOCKET) {
            self.socket = PathBuf::from(socket);
        }
        if let Ok(upstream) = env::var(ENV_UPSTREAM) {
            self.upstream = upstream;
        }
        if let Some(addr) = Self::parse_env(ENV_ADB_ADDR)? {
            self.adb_addr = addr;
        }
        if let Ok(serial) = env::var(ENV_DEVICE_SERIAL) {
            self.device_serial = Some(serial).filter(|s| !s.is_empty());
        }
        if let Some(ms) = Self::parse_env(ENV_POLL_INTERVAL_MS)? {
            self.poll_interval_ms = ms;
        }
        if let Some(ms) = Self::parse_env(ENV_ADB_TIMEOUT_MS)? {
            self.adb_timeout_ms = ms;
        }
        // Priority: TRANSPORT_PROXY_LOG_LEVEL > RUST_LOG > file/default
        if let Ok(level) = env::var(ENV_LOG_LEVEL).or_else(|_| env::var("RUST_LOG")) {
            self.log_level = level;
        }
        Ok(())
    }

    fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
        match env::var(key) {
            Ok(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                }),
            Err(_) => Ok(None),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".to_string()));
        }
        if self.adb_timeout_ms == 0 {
            return Err(ConfigError::Invalid("adb_timeout_ms must be positive".to_string()));
        }
        if !["http://", "unix://"]
            .iter()
            .any(|scheme| self.upstream.starts_with(scheme))
        {
            return Err(ConfigError::Invalid(format!(
                "upstream '{}' must use http:// or unix://",
                self.upstream
            )));
        }
        if self.transport_mode == TransportMode::Unix && self.socket.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "unix transport mode requires a socket path".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen(&self) -> ListenAddr {
        match self.transport_mode {
            TransportMode::Tcp => ListenAddr::Tcp(self.listen_addr),
            TransportMode::Unix => ListenAddr::Unix(self.socket.clone()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn adb_timeout(&self) -> Duration {
        Duration::from_millis(self.adb_timeout_ms)
    }
}
