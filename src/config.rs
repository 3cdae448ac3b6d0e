use crate::domain::Resource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Process-level settings, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub resources_file: String,
    /// Upper bound on simultaneous client calls across all resources.
    pub rpc_concurrency: usize,
    pub retry_max_elapsed: Duration,
    pub watch_poll_interval: Duration,
    pub watch_restart_delay: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Failed to load resources file {0}: {1}")]
    ResourcesFile(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let resources_file = env_map
            .get("RESOURCES_FILE")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("RESOURCES_FILE".to_string()))?;

        let rpc_concurrency = env_map
            .get("BLOCKGAUGE_RPC_CONCURRENCY")
            .map(|s| s.as_str())
            .unwrap_or("8")
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "BLOCKGAUGE_RPC_CONCURRENCY".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        let retry_max_elapsed = env_map
            .get("BLOCKGAUGE_RETRY_MAX_ELAPSED_MS")
            .map(|s| s.as_str())
            .unwrap_or("30000")
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "BLOCKGAUGE_RETRY_MAX_ELAPSED_MS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        let watch_poll_interval = env_map
            .get("BLOCKGAUGE_WATCH_POLL_SECS")
            .map(|s| s.as_str())
            .unwrap_or("12")
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "BLOCKGAUGE_WATCH_POLL_SECS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        let watch_restart_delay = env_map
            .get("BLOCKGAUGE_WATCH_RESTART_DELAY_SECS")
            .map(|s| s.as_str())
            .unwrap_or("5")
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "BLOCKGAUGE_WATCH_RESTART_DELAY_SECS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        Ok(Config {
            database_path,
            resources_file,
            rpc_concurrency,
            retry_max_elapsed,
            watch_poll_interval,
            watch_restart_delay,
        })
    }
}

/// One entry in the resources file: the resource definition plus the RPC
/// endpoint its client talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    #[serde(flatten)]
    pub resource: Resource,
    pub rpc_url: String,
}

/// Load and parse the JSON resources file.
pub fn load_resources(path: &str) -> Result<Vec<ResourceConfig>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ResourcesFile(path.to_string(), e.to_string()))?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::ResourcesFile(path.to_string(), e.to_string()))
}
