//! Runtime configuration: where projects live and how hard to retry locks.
//!
//! Loaded from `pipeledger.toml` (or an explicit path), then overridden by
//! `PIPELEDGER_DATA_ROOT` when set.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fs::locking::{RetryPolicy, DEFAULT_LOCK_ATTEMPTS, DEFAULT_LOCK_INTERVAL};
use crate::fs::DataDir;
use crate::project::ProjectStore;

pub const CONFIG_FILE: &str = "pipeledger.toml";
pub const DATA_ROOT_ENV: &str = "PIPELEDGER_DATA_ROOT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            lock: LockConfig::default(),
        }
    }
}

fn default_data_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pipeledger")
}

fn default_attempts() -> u32 {
    DEFAULT_LOCK_ATTEMPTS
}

fn default_interval_ms() -> u64 {
    DEFAULT_LOCK_INTERVAL.as_millis() as u64
}

impl Config {
    /// Load `path`, or `pipeledger.toml` in the working directory when no path
    /// is given. A missing default file yields the defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.is_file() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Some(root) = std::env::var_os(DATA_ROOT_ENV).filter(|v| !v.is_empty()) {
            config.data_root = PathBuf::from(root);
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        anyhow::ensure!(config.lock.attempts > 0, "lock.attempts must be at least 1");
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lock.attempts,
            Duration::from_millis(self.lock.interval_ms),
        )
    }

    pub fn data_dir(&self) -> DataDir {
        DataDir::new(&self.data_root)
    }

    pub fn project_store(&self) -> ProjectStore {
        ProjectStore::new(self.data_dir(), self.retry_policy())
    }
}
