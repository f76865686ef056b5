// Configuration management for the PeroLink gateway
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/perolink/config.json
// - Linux: ~/.config/perolink/config.json
// - Windows: %APPDATA%\perolink\config.json

use anyhow::{Context, Result};
use perolink_core::relay::{AuthPolicy, RelayConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Default gateway port
pub const DEFAULT_PORT: u16 = 14747;

/// File name of the credential handed to companion processes
pub const TOKEN_FILE_NAME: &str = "gateway_token.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port for the WebSocket endpoint
    pub listen_port: u16,

    /// Interface to bind
    pub bind_address: String,

    /// Where the startup token is written (None = data dir)
    pub token_file: Option<String>,

    /// Relay behaviour
    pub relay: RelaySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Reject handshakes with a wrong token. `false` only warns.
    pub enforce_auth: bool,

    /// Close a connection when another one takes over its node id
    pub close_superseded: bool,

    /// Frames buffered per node before sends are dropped
    pub outbound_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            token_file: None,
            relay: RelaySettings::default(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        let defaults = RelayConfig::default();
        Self {
            enforce_auth: true,
            close_superseded: defaults.close_superseded,
            outbound_queue_depth: defaults.outbound_queue_depth,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("perolink");

        std::fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("perolink");

        std::fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .context("Failed to read config file")?;
            let config: Config = serde_json::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .context("Failed to write config file")?;
        Ok(())
    }

    /// Resolved token file location
    pub fn token_path(&self) -> Result<PathBuf> {
        match &self.token_file {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join(TOKEN_FILE_NAME)),
        }
    }

    /// Socket address the gateway listens on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.bind_address))?;
        Ok(SocketAddr::new(ip, self.listen_port))
    }

    /// Relay settings in the form the core expects
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            auth_policy: AuthPolicy::from_enforce(self.relay.enforce_auth),
            close_superseded: self.relay.close_superseded,
            outbound_queue_depth: self.relay.outbound_queue_depth,
            ..RelayConfig::default()
        }
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "listen_port" => {
                self.listen_port = value.parse()
                    .context("Invalid port number")?;
            }
            "bind_address" => {
                value.parse::<IpAddr>()
                    .context("Invalid IP address")?;
                self.bind_address = value.to_string();
            }
            "token_file" => {
                self.token_file = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "enforce_auth" => {
                self.relay.enforce_auth = value.parse()
                    .context("Invalid boolean value")?;
            }
            "close_superseded" => {
                self.relay.close_superseded = value.parse()
                    .context("Invalid boolean value")?;
            }
            "outbound_queue_depth" => {
                let depth: usize = value.parse()
                    .context("Invalid number")?;
                if depth == 0 {
                    anyhow::bail!("outbound_queue_depth must be at least 1");
                }
                self.relay.outbound_queue_depth = depth;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "listen_port" => Some(self.listen_port.to_string()),
            "bind_address" => Some(self.bind_address.clone()),
            "token_file" => self.token_file.clone(),
            "enforce_auth" => Some(self.relay.enforce_auth.to_string()),
            "close_superseded" => Some(self.relay.close_superseded.to_string()),
            "outbound_queue_depth" => Some(self.relay.outbound_queue_depth.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("listen_port".to_string(), self.listen_port.to_string()),
            ("bind_address".to_string(), self.bind_address.clone()),
            ("token_file".to_string(), self.token_file.clone().unwrap_or_else(|| "(auto)".to_string())),
            ("enforce_auth".to_string(), self.relay.enforce_auth.to_string()),
            ("close_superseded".to_string(), self.relay.close_superseded.to_string()),
            ("outbound_queue_depth".to_string(), self.relay.outbound_queue_depth.to_string()),
        ]
    }
}
