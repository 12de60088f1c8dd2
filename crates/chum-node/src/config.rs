//! Node configuration: base storage directory, discovery and transport
//! bind addresses, and instance bootstrap identity (SPEC_FULL.md §2).
//! Loaded from a TOML file and defaulted field-by-field the way
//! `sblanchard-SerialAgent`'s config does, then overridden by CLI flags
//! in `cli.rs`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub instance: InstanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: SocketAddr,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_bind_addr")]
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_websocket_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_instance_name")]
    pub name: String,
    #[serde(default)]
    pub owner_email: String,
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("chum")
}

fn default_discovery_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], chum_discovery::DISCOVERY_PORT))
}

fn default_broadcast_addr() -> SocketAddr {
    SocketAddr::from(([255, 255, 255, 255], chum_discovery::DISCOVERY_PORT))
}

fn default_interval_secs() -> u64 {
    chum_discovery::BROADCAST_INTERVAL_SECS
}

fn default_transport_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9735))
}

fn default_websocket_port() -> u16 {
    8765
}

fn default_instance_name() -> String {
    "chum-instance".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig::default(),
            discovery: DiscoveryConfig::default(),
            transport: TransportConfig::default(),
            websocket: WebSocketConfig::default(),
            instance: InstanceConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig { base_dir: default_base_dir() }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            bind_addr: default_discovery_bind_addr(),
            broadcast_addr: default_broadcast_addr(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig { bind_addr: default_transport_bind_addr() }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig { port: default_websocket_port() }
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig { name: default_instance_name(), owner_email: String::new() }
    }
}

impl Config {
    /// Loads configuration from a TOML file. Missing keys fall back to
    /// their field-level defaults.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Loads from `path` if it exists, otherwise returns defaults.
    pub fn load_or_default(path: &std::path::Path) -> Self {
        match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "no usable config file, using defaults");
                Config::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert_eq!(config.websocket.port, 8765);
        assert_eq!(config.discovery.bind_addr.port(), chum_discovery::DISCOVERY_PORT);
    }

    #[test]
    fn partial_toml_fills_in_missing_sections_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chum.toml");
        std::fs::write(
            &path,
            r#"
            [instance]
            name = "alice-laptop"
            owner_email = "alice@example.com"
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.instance.name, "alice-laptop");
        assert_eq!(config.instance.owner_email, "alice@example.com");
        assert_eq!(config.websocket.port, 8765);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_or_default(std::path::Path::new("/nonexistent/chum.toml"));
        assert_eq!(config.instance.name, "chum-instance");
    }
}
