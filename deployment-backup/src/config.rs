//! Configuration management for the backup orchestrator.
//!
//! Loads configuration from a TOML file; every key falls back to a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bundle: BundleConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Directory new backup bundles are created in
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Instances contacted at once by lock, unlock and cleanup
    #[serde(default = "default_max_concurrent_instances")]
    pub max_concurrent_instances: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_concurrent_instances() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_instances: default_max_concurrent_instances(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bundle: BundleConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.orchestrator.max_concurrent_instances == 0 {
            anyhow::bail!("orchestrator.max_concurrent_instances must be at least 1");
        }
        Ok(config)
    }
}
