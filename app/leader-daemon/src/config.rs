//! TOML configuration for the leader daemon. Same shape as the teacher's
//! `at-core::config::Config`: one flat, fully-defaulted struct loaded from
//! disk with `toml`, never an error to be missing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_storage_root")]
    pub storage_root: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_mqtt_broker_addr")]
    pub mqtt_broker_addr: String,
    #[serde(default = "default_mqtt_broker_port")]
    pub mqtt_broker_port: u16,
    #[serde(default = "default_worker_rpc_port")]
    pub worker_rpc_port: u16,
    #[serde(default = "default_pio_executable")]
    pub pio_executable: String,
    #[serde(default = "default_pios_executable")]
    pub pios_executable: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            cache_dir: default_cache_dir(),
            bind_addr: default_bind_addr(),
            mqtt_broker_addr: default_mqtt_broker_addr(),
            mqtt_broker_port: default_mqtt_broker_port(),
            worker_rpc_port: default_worker_rpc_port(),
            pio_executable: default_pio_executable(),
            pios_executable: default_pios_executable(),
            log_level: default_log_level(),
        }
    }
}

fn default_storage_root() -> String {
    "/home/pioreactor/.pioreactor".into()
}
fn default_cache_dir() -> String {
    "/home/pioreactor/.pioreactor/storage/cache".into()
}
fn default_bind_addr() -> String {
    "0.0.0.0:4999".into()
}
fn default_mqtt_broker_addr() -> String {
    "localhost".into()
}
fn default_mqtt_broker_port() -> u16 {
    1883
}
fn default_worker_rpc_port() -> u16 {
    4998
}
fn default_pio_executable() -> String {
    "/usr/local/bin/pio".into()
}
fn default_pios_executable() -> String {
    "/usr/local/bin/pios".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io { path: path.to_path_buf(), source: e })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse { path: path.to_path_buf(), source: e })
    }

    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(path) if path.exists() => Self::load_from(path).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "failed to load config, using defaults");
                Self::default()
            }),
            _ => Self::default(),
        }
    }
}
