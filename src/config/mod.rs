//! Configuration system for Berth

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::integrations::runtime::parser::MissingStatus;
use crate::integrations::runtime::ListCommand;

/// Global application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub polling: PollingConfig,
    pub parser: ParserConfig,
    pub operations: OperationsConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("berth").join("config.toml"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Checked before the built-in candidate locations
    pub tool: Option<PathBuf>,
    pub list_command: ListCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ParserConfig {
    pub missing_status: MissingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    pub container_settle_ms: u64,
    pub service_settle_ms: u64,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            container_settle_ms: 1000,
            service_settle_ms: 2000,
        }
    }
}

impl OperationsConfig {
    pub fn container_settle(&self) -> Duration {
        Duration::from_millis(self.container_settle_ms)
    }

    pub fn service_settle(&self) -> Duration {
        Duration::from_millis(self.service_settle_ms)
    }
}

/// Write the default configuration to `path`
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("Configuration already exists. Use --force to overwrite.");
    }

    Config::default().save(path)?;
    println!("Created {}", path.display());
    Ok(())
}
