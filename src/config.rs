//! Explicit configuration for the inventory runbooks
//!
//! Settings are loaded once from a TOML file and handed to whatever needs
//! them. Nothing here reads ambient process state.

use crate::lifecycle::{PowerCycle, ServerRef};
use crate::melt::FlattenConfig;
use crate::snapshot::{parse_tags, SnapshotError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub flatten: FlattenConfig,
    pub export: ExportSettings,
    pub report: Option<ReportSettings>,
    pub snapshot: Option<SnapshotSettings>,
    pub server: Option<ServerSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            output_dir: PathBuf::from("inventory"),
        }
    }
}

/// Who receives the report, and where the mail API key is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSettings {
    pub sender: String,
    pub recipient: String,
    pub key_vault: String,
    pub api_key_secret: String,
}

impl ReportSettings {
    pub fn vault_url(&self) -> String {
        format!("https://{}.vault.azure.net", self.key_vault)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSettings {
    pub vm_name: String,
    /// JSON object of tag names to values
    #[serde(default = "empty_tags")]
    pub tags: String,
}

fn empty_tags() -> String {
    String::from("{}")
}

impl SnapshotSettings {
    pub fn tags(&self) -> Result<Map<String, Value>, SnapshotError> {
        parse_tags(&self.tags)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub subscription: String,
    pub resource_group: String,
    pub name: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub max_polls: Option<usize>,
}

fn default_poll_interval() -> u64 {
    30
}

impl ServerSettings {
    pub fn server_ref(&self) -> ServerRef {
        ServerRef {
            subscription: self.subscription.clone(),
            resource_group: self.resource_group.clone(),
            name: self.name.clone(),
        }
    }

    pub fn power_cycle(&self) -> PowerCycle {
        let cycle = PowerCycle::new(Duration::from_secs(self.poll_interval_secs));
        match self.max_polls {
            Some(max) => cycle.max_polls(max),
            None => cycle,
        }
    }
}

impl InventoryConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: InventoryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flatten.separator.is_empty() {
            return Err(ConfigError::Invalid("flatten.separator must not be empty".into()));
        }
        if let Some(server) = &self.server {
            if server.poll_interval_secs == 0 {
                return Err(ConfigError::Invalid("server.poll_interval_secs must be positive".into()));
            }
        }
        if let Some(snapshot) = &self.snapshot {
            snapshot
                .tags()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }
}
