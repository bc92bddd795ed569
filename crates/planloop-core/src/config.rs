//! Planloop configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanloopConfig {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub worker: WorkerConfig,
}

fn default_log_filter() -> String {
    "planloop=info".into()
}

impl Default for PlanloopConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            worker: WorkerConfig::default(),
        }
    }
}

impl PlanloopConfig {
    /// Load config from the default path (~/.planloop/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::PlanError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::PlanError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::PlanError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".planloop")
            .join("config.toml")
    }

    /// Get the Planloop home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".planloop")
    }
}

/// Scheduler worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds to wait after start before the first poll tick.
    #[serde(default)]
    pub delay: u64,
    /// Seconds between poll ticks.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Whether the host runs its static plan registration table.
    #[serde(default = "bool_true")]
    pub auto_bind: bool,
}

fn default_interval() -> u64 {
    30
}

fn bool_true() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            delay: 0,
            interval: default_interval(),
            auto_bind: bool_true(),
        }
    }
}
