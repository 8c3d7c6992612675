use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use anyhow::Context;

use crate::store::postgres::{IsolationLevel, SessionOptions};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL for the record store
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_ms: 5000,
        }
    }
}

/// Transfer unit-of-work settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TransferConfig {
    #[serde(default)]
    pub isolation: IsolationLevel,
    /// Max wait for a single row lock; expiry is a retryable conflict
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,
    /// Whole-call deadline; expiry rolls back and returns `Cancelled`
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl TransferConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            isolation: self.isolation,
            lock_timeout: self.lock_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
