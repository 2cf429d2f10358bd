//! Configuration for nagare.
//!
//! Configuration is loaded from `~/.config/nagare/nagare.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::fanout::DEFAULT_MAX_WORKERS;
use crate::ops::DEFAULT_BATCH_LIMIT;

/// Engine defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NagareConfig {
    /// Fan-out worker bound (0 = unbounded).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Values buffered per upstream suspension by async operators.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_batch_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}

impl Default for NagareConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            batch_limit: default_batch_limit(),
        }
    }
}

impl NagareConfig {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Get the default config file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "nagare")
            .context("Could not determine config directory")?;

        Ok(dirs.config_dir().join("nagare.toml"))
    }
}
