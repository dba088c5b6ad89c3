//! TOML-based configuration for the `allone` binary.
//!
//! Reads `AppConfig` from the platform-appropriate config file unless a path
//! is given explicitly:
//! - Windows:  `%APPDATA%\Allone\config.toml`
//! - Linux:    `~/.config/allone/config.toml`
//! - macOS:    `~/Library/Application Support/Allone/config.toml`
//!
//! ```toml
//! [network]
//! bind_address = "0.0.0.0"
//! broadcast_address = "192.168.1.255"
//!
//! [timing]
//! learn_timeout_secs = 20
//! require_emit_ack = false
//!
//! [store]
//! directory = "/var/lib/allone/ir"
//! ```
//!
//! Every field has a serde default, so a missing file, an empty file, or a
//! file from an older version all load.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use allone_core::protocol::PROTOCOL_PORT;
use serde::Deserialize;
use thiserror::Error;

use crate::application::{AckPolicy, EngineSettings};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// An address field is not a valid IP address.
    #[error("invalid {field} {value:?}: {source}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Socket addresses and ports.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IP address to bind every socket to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Local port for discovery sockets.  Some bridges only answer to 10000.
    #[serde(default = "default_port")]
    pub listen_port: u16,
    /// Where discovery requests are broadcast, usually the subnet broadcast.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// Port the bridges listen on.
    #[serde(default = "default_port")]
    pub protocol_port: u16,
}

/// Protocol timeouts and pacing, in the units their names say.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_discovery_window_ms")]
    pub discovery_window_ms: u64,
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
    #[serde(default = "default_subscribe_min_interval_ms")]
    pub subscribe_min_interval_ms: u64,
    #[serde(default = "default_learn_timeout_secs")]
    pub learn_timeout_secs: u64,
    #[serde(default = "default_learn_ack_timeout_ms")]
    pub learn_ack_timeout_ms: u64,
    #[serde(default = "default_emit_ack_timeout_ms")]
    pub emit_ack_timeout_ms: u64,
    #[serde(default = "default_emit_spacing_ms")]
    pub emit_spacing_ms: u64,
    /// `false` treats a missing emit ack as delivery (firmware without acks).
    #[serde(default = "default_true")]
    pub require_emit_ack: bool,
}

/// Where learned codes are kept.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Directory holding one file per code.  Relative paths resolve against
    /// the working directory.
    #[serde(default = "default_store_directory")]
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LogConfig {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_port() -> u16 {
    PROTOCOL_PORT
}
fn default_discovery_window_ms() -> u64 {
    3000
}
fn default_subscribe_timeout_ms() -> u64 {
    1500
}
fn default_subscribe_min_interval_ms() -> u64 {
    100
}
fn default_learn_timeout_secs() -> u64 {
    15
}
fn default_learn_ack_timeout_ms() -> u64 {
    1000
}
fn default_emit_ack_timeout_ms() -> u64 {
    500
}
fn default_emit_spacing_ms() -> u64 {
    100
}
fn default_true() -> bool {
    true
}
fn default_store_directory() -> PathBuf {
    PathBuf::from("ir")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            listen_port: default_port(),
            broadcast_address: default_broadcast_address(),
            protocol_port: default_port(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discovery_window_ms: default_discovery_window_ms(),
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
            subscribe_min_interval_ms: default_subscribe_min_interval_ms(),
            learn_timeout_secs: default_learn_timeout_secs(),
            learn_ack_timeout_ms: default_learn_ack_timeout_ms(),
            emit_ack_timeout_ms: default_emit_ack_timeout_ms(),
            emit_spacing_ms: default_emit_spacing_ms(),
            require_emit_ack: default_true(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_store_directory(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Parsed `network.bind_address`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] if the field is not an IP address.
    pub fn bind_address(&self) -> Result<IpAddr, ConfigError> {
        parse_ip("network.bind_address", &self.network.bind_address)
    }

    /// Converts the file representation into the engine's typed settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] for a bad broadcast address.
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        let broadcast_ip = parse_ip("network.broadcast_address", &self.network.broadcast_address)?;
        let t = &self.timing;
        Ok(EngineSettings {
            broadcast: SocketAddr::new(broadcast_ip, self.network.protocol_port),
            discovery_window: Duration::from_millis(t.discovery_window_ms),
            subscribe_timeout: Duration::from_millis(t.subscribe_timeout_ms),
            subscribe_min_interval: Duration::from_millis(t.subscribe_min_interval_ms),
            learn_timeout: Duration::from_secs(t.learn_timeout_secs),
            learn_ack_timeout: Duration::from_millis(t.learn_ack_timeout_ms),
            emit_ack_timeout: Duration::from_millis(t.emit_ack_timeout_ms),
            emit_spacing: Duration::from_millis(t.emit_spacing_ms),
            ack_policy: if t.require_emit_ack {
                AckPolicy::Required
            } else {
                AckPolicy::BestEffort
            },
        })
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::InvalidAddress {
            field,
            value: value.to_string(),
            source,
        })
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Allone"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("allone"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Allone")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
