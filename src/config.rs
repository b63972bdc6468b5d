use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::store::Backend;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub backend: Backend,
    /// Connection URL; required for every backend except `memory`
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// Upper bound on a single row-lock wait
    pub lock_timeout_ms: u64,
    /// Run the idempotent DDL on startup
    #[serde(default)]
    pub bootstrap_schema: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            url: None,
            max_connections: 10,
            acquire_timeout_ms: 3000,
            lock_timeout_ms: 5000,
            bootstrap_schema: false,
        }
    }
}

impl DatabaseConfig {
    #[inline]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[inline]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Reject settings this build cannot serve
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lock_timeout_ms == 0 {
            bail!("database.lock_timeout_ms must be greater than zero");
        }
        match self.backend {
            Backend::Postgres => {
                if self.url.as_deref().is_none_or(str::is_empty) {
                    bail!("database.url is required for the postgres backend");
                }
                if self.max_connections == 0 {
                    bail!("database.max_connections must be greater than zero");
                }
            }
            Backend::Memory => {
                if !cfg!(feature = "memory-store") {
                    bail!("memory backend requires the `memory-store` feature");
                }
            }
            Backend::SqlServer | Backend::MySql => {
                bail!(
                    "no driver compiled for backend `{}` (only postgres and memory are linked)",
                    self.backend
                );
            }
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config: {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.database.validate()?;
        Ok(config)
    }
}
