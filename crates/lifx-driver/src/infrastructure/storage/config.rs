//! TOML-based settings persistence for the driver.
//!
//! Reads and writes [`DriverSettings`] to the platform-appropriate file:
//! - Windows:  `%APPDATA%\LifxDriver\driver.toml`
//! - Linux:    `~/.config/lifx-driver/driver.toml`
//! - macOS:    `~/Library/Application Support/LifxDriver/driver.toml`
//!
//! ```toml
//! [driver]
//! port = 56700
//! reliable = true
//! broadcast_address = "255.255.255.255"
//!
//! [timeouts]
//! request_timeout_ms = 2000
//! retry_interval_ms = 500
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section and
//! a missing key all fall back to the values above.

use std::net::{AddrParseError, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lifx_core::protocol::messages::{DEFAULT_PORT, HEADER_SIZE, MAX_DATAGRAM_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::ClientTimeouts;
use crate::driver::DriverConfig;

const FILE_NAME: &str = "driver.toml";

/// Error type for settings file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
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

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The broadcast address is not an IPv4 address.
    #[error("invalid broadcast address {value:?}: {source}")]
    InvalidAddress {
        value: String,
        #[source]
        source: AddrParseError,
    },
}

// ── Settings schema ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DriverSettings {
    #[serde(default)]
    pub driver: DriverSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverSection {
    /// Local UDP port to bind.  `0` picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request an acknowledgement for every state-changing message.
    #[serde(default = "default_true")]
    pub reliable: bool,
    /// Destination of discovery and whole-network commands.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// Receive buffer size.  Larger datagrams are truncated by the OS.
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
    /// `tracing` filter used by the `lifx-watch` binary when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutSection {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// `0` disables retransmission.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_true() -> bool {
    true
}
fn default_broadcast_address() -> String {
    Ipv4Addr::BROADCAST.to_string()
}
fn default_max_datagram_size() -> usize {
    MAX_DATAGRAM_SIZE
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_request_timeout_ms() -> u64 {
    2000
}
fn default_retry_interval_ms() -> u64 {
    500
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            reliable: default_true(),
            broadcast_address: default_broadcast_address(),
            max_datagram_size: default_max_datagram_size(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl DriverSettings {
    /// Converts the `[driver]` section into a runtime [`DriverConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if the broadcast address does
    /// not parse.
    pub fn driver_config(&self) -> Result<DriverConfig, ConfigError> {
        let broadcast: Ipv4Addr = self.driver.broadcast_address.parse().map_err(|source| {
            ConfigError::InvalidAddress {
                value: self.driver.broadcast_address.clone(),
                source,
            }
        })?;
        Ok(DriverConfig {
            port: self.driver.port,
            reliable: self.driver.reliable,
            broadcast_addr: broadcast.into(),
            broadcast_port: DEFAULT_PORT,
            max_datagram_size: self.driver.max_datagram_size.max(HEADER_SIZE),
        })
    }

    pub fn client_timeouts(&self) -> ClientTimeouts {
        ClientTimeouts {
            request_timeout: Duration::from_millis(self.timeouts.request_timeout_ms),
            retry_interval: Duration::from_millis(self.timeouts.retry_interval_ms),
        }
    }
}

// ── Settings repository ───────────────────────────────────────────────────────

/// Resolves the full path to the settings file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined from the environment.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join(FILE_NAME))
}

/// Loads settings from the platform location, or defaults if absent.
pub fn load_settings() -> Result<DriverSettings, ConfigError> {
    load_settings_from(&config_file_path()?)
}

/// Loads settings from `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_settings_from(path: &Path) -> Result<DriverSettings, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DriverSettings::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn save_settings(settings: &DriverSettings) -> Result<(), ConfigError> {
    save_settings_to(settings, &config_file_path()?)
}

/// Writes `settings` to `path`, creating parent directories as needed.
pub fn save_settings_to(settings: &DriverSettings, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(settings)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LifxDriver"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lifx-driver"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LifxDriver")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}
