//! JSON configuration files, loaded once at startup.
//!
//! The Agent additionally exposes get/set by key through its control
//! socket; [`AgentConfigStore`] guards the live config and persists
//! changes back to the file (applied on the next restart).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// Configuration failures. Invalid values are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Agent-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// TCP port the Agent listens on.
    pub port: u16,
    /// Pre-shared symmetric key, 16/24/32 bytes.
    pub secret_key: String,
    /// Address of the controlling Center (informational; the Center dials).
    #[serde(default)]
    pub center_ip: String,
    #[serde(default)]
    pub center_port: u16,
    /// Log file path; empty means stderr.
    #[serde(default)]
    pub log_path: String,
}

/// Center-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CenterConfig {
    /// Pre-shared symmetric key, shared with every Agent.
    pub secret_key: String,
    /// Agent endpoints ("ip:port") the Center dials and supervises.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Log file path; empty means stderr.
    #[serde(default)]
    pub log_path: String,
    /// Heartbeat interval in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

impl CenterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_json(path)
    }
}

/// Live Agent configuration with get/set-by-key for the control socket.
pub struct AgentConfigStore {
    path: PathBuf,
    config: RwLock<AgentConfig>,
}

impl AgentConfigStore {
    /// Load the config file and wrap it for concurrent access.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = AgentConfig::load(&path)?;
        Ok(Self {
            path,
            config: RwLock::new(config),
        })
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> AgentConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Render one key, or the whole config when `key` is empty.
    pub fn get_key(&self, key: &str) -> Result<String, ConfigError> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        match key {
            "" => Ok(format!(
                "port={}\nsecret_key={}\ncenter_ip={}\ncenter_port={}\nlog_path={}",
                config.port,
                config.secret_key,
                config.center_ip,
                config.center_port,
                config.log_path
            )),
            "port" => Ok(config.port.to_string()),
            "secret_key" => Ok(config.secret_key.clone()),
            "center_ip" => Ok(config.center_ip.clone()),
            "center_port" => Ok(config.center_port.to_string()),
            "log_path" => Ok(config.log_path.clone()),
            _ => Err(ConfigError::UnknownKey(key.to_string())),
        }
    }

    /// Set one key and persist the file. Takes effect on restart.
    pub fn set_key(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        match key {
            "port" => {
                config.port = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("not a port number: {value}"),
                })?;
            }
            "secret_key" => {
                if !matches!(value.len(), 16 | 24 | 32) {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        reason: "key must be 16, 24 or 32 bytes".to_string(),
                    });
                }
                config.secret_key = value.to_string();
            }
            "center_ip" => config.center_ip = value.to_string(),
            "center_port" => {
                config.center_port = value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("not a port number: {value}"),
                })?;
            }
            "log_path" => config.log_path = value.to_string(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        config.save(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("agent.json");
        std::fs::write(
            &path,
            r#"{"port":9000,"secret_key":"0123456789abcdef","center_ip":"10.0.0.1","center_port":9100,"log_path":""}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_load_agent_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir);
        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.secret_key, "0123456789abcdef");
        assert_eq!(config.center_ip, "10.0.0.1");
    }

    #[test]
    fn test_store_get_set_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir);
        let store = AgentConfigStore::load(&path).unwrap();

        assert_eq!(store.get_key("port").unwrap(), "9000");
        store.set_key("port", "9001").unwrap();
        assert_eq!(store.get_key("port").unwrap(), "9001");

        // The change must be persisted to disk.
        let reloaded = AgentConfig::load(&path).unwrap();
        assert_eq!(reloaded.port, 9001);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentConfigStore::load(write_config(&dir)).unwrap();
        assert!(matches!(
            store.get_key("nope"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            store.set_key("nope", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_bad_secret_key_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentConfigStore::load(write_config(&dir)).unwrap();
        assert!(matches!(
            store.set_key("secret_key", "short"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_center_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("center.json");
        std::fs::write(&path, r#"{"secret_key":"0123456789abcdef"}"#).unwrap();
        let config = CenterConfig::load(&path).unwrap();
        assert!(config.hosts.is_empty());
        assert_eq!(config.heartbeat_secs, 30);
    }
}
