//! Gateway configuration, loaded from a TOML file with environment
//! overrides — the Rust counterpart of the original `AppConfig`
//! (`network`/`dds`/`logging` sections, loaded from JSON in the source
//! tree). This module is the only place environment and filesystem
//! concerns are treated as anything other than opaque collaborators.

use std::{fs, path::Path};

use serde::Deserialize;

use crate::transport::Role;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfiguredRole {
  Server,
  Client,
}

impl From<ConfiguredRole> for Role {
  fn from(value: ConfiguredRole) -> Self {
    match value {
      ConfiguredRole::Server => Role::Server,
      ConfiguredRole::Client => Role::Client,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  pub role: ConfiguredRole,
  #[serde(default = "default_bind")]
  pub bind: String,
  #[serde(default = "default_port")]
  pub port: u16,
}

fn default_bind() -> String {
  "0.0.0.0".to_string()
}

fn default_port() -> u16 {
  25000
}

/// The pub/sub runtime's receive mode (spec.md §6). Treated as an opaque
/// preference passed through to the runtime collaborator.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReceiveMode {
  Waitset,
  Listener,
}

impl Default for ReceiveMode {
  fn default() -> Self {
    ReceiveMode::Waitset
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DdsConfig {
  #[serde(default = "default_qos_dir")]
  pub qos_dir: String,
  #[serde(default)]
  pub receive_mode: ReceiveMode,
}

fn default_qos_dir() -> String {
  "qos".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_level")]
  pub level: String,
  #[serde(default = "default_true")]
  pub console: bool,
}

fn default_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

impl Default for LoggingConfig {
  fn default() -> Self {
    LoggingConfig { level: default_level(), console: true }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
  pub network: NetworkConfig,
  #[serde(default = "default_dds")]
  pub dds: DdsConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

fn default_dds() -> DdsConfig {
  DdsConfig { qos_dir: default_qos_dir(), receive_mode: ReceiveMode::default() }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read { path: String, #[source] source: std::io::Error },
  #[error("failed to parse config file {path}: {source}")]
  Parse { path: String, #[source] source: toml::de::Error },
}

impl GatewayConfig {
  /// Load configuration from a TOML file at `path`.
  pub fn load(path: impl AsRef<Path>) -> Result<GatewayConfig, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
      .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
    toml::from_str(&text)
      .map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_minimal_server_config() {
    let toml = r#"
      [network]
      role = "server"
      port = 25000
    "#;
    let cfg: GatewayConfig = toml::from_str(toml).unwrap();
    assert!(matches!(cfg.network.role, ConfiguredRole::Server));
    assert_eq!(cfg.network.bind, "0.0.0.0");
    assert_eq!(cfg.dds.qos_dir, "qos");
    assert_eq!(cfg.logging.level, "info");
  }

  #[test]
  fn parses_full_config() {
    let toml = r#"
      [network]
      role = "client"
      bind = "127.0.0.1"
      port = 9000

      [dds]
      qos_dir = "custom-qos"
      receive_mode = "listener"

      [logging]
      level = "debug"
      console = false
    "#;
    let cfg: GatewayConfig = toml::from_str(toml).unwrap();
    assert!(matches!(cfg.network.role, ConfiguredRole::Client));
    assert_eq!(cfg.dds.receive_mode, ReceiveMode::Listener);
    assert_eq!(cfg.logging.level, "debug");
    assert!(!cfg.logging.console);
  }
}
