//! Configuration module
//!
//! Handles loading and saving PeerSync configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::network::NetworkOptions;
use crate::protocol::{DEFAULT_BUFFER_SIZE, DEFAULT_HEADER_SIZE, DEFAULT_PORT, PROTOCOL_VERSION};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Wire protocol settings
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Handler execution settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Human-readable name for this node
    #[serde(default = "default_name")]
    pub name: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Log file path (optional)
    pub log_file: Option<PathBuf>,
}

fn default_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            verbose: false,
            log_file: None,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl NetworkConfig {
    /// Address a host listens on
    pub fn listen_address(&self) -> String {
        let ip = self.bind_address.as_deref().unwrap_or("0.0.0.0");
        format!("{}:{}", ip, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Wire protocol configuration. Both ends must agree on every value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Frame size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Header block size in bytes
    #[serde(default = "default_header_size")]
    pub header_size: usize,
    /// Announced in the `ver` header
    #[serde(default = "default_protocol_version")]
    pub protocol_version: i32,
    /// Maximum clients a host accepts (unlimited if not set)
    pub max_clients: Option<usize>,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_header_size() -> usize {
    DEFAULT_HEADER_SIZE
}

fn default_protocol_version() -> i32 {
    PROTOCOL_VERSION
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            header_size: default_header_size(),
            protocol_version: default_protocol_version(),
            max_clients: None,
        }
    }
}

/// Where packet handlers run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// On a dedicated marshaller thread
    #[default]
    Worker,
    /// On the transport delivery thread
    Direct,
}

/// Dispatch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mode: DispatchMode,
}

impl From<&Config> for NetworkOptions {
    fn from(config: &Config) -> Self {
        Self {
            buffer_size: config.protocol.buffer_size,
            header_size: config.protocol.header_size,
            protocol_version: config.protocol.protocol_version,
            max_clients: config.protocol.max_clients,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("peersync/config.toml")),
            Some(PathBuf::from("./peersync.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::debug!("Loading configuration from {}", path.display());
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Network options derived from the protocol section
    pub fn network_options(&self) -> NetworkOptions {
        NetworkOptions::from(self)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            name: "game-host".to_string(),
            verbose: false,
            log_file: None,
        },
        network: NetworkConfig {
            bind_address: Some("0.0.0.0".to_string()),
            ..Default::default()
        },
        protocol: ProtocolConfig {
            max_clients: Some(8),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
