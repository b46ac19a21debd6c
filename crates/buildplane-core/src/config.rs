//! buildplane.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildplaneConfig {
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub compare: CompareConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the redb file backing the object store.
    pub path: PathBuf,
    /// Keys fetched per listing page.
    pub list_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/buildplane/objects.redb"),
            list_page_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Skip external validation; builds complete straight from BUILDING.
    pub offline_mode: bool,
    pub validation_poll_interval_secs: u64,
    pub validation_timeout_minutes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            offline_mode: false,
            validation_poll_interval_secs: 30,
            validation_timeout_minutes: 120,
        }
    }
}

impl PipelineConfig {
    pub fn validation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.validation_poll_interval_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    pub poll_interval_secs: u64,
    pub max_wait_minutes: u64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_wait_minutes: 300,
        }
    }
}

impl CompareConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_minutes.saturating_mul(60))
    }
}

impl BuildplaneConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BuildplaneConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
