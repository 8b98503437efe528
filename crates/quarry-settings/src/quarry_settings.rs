//! Quarry Settings
//!
//! One JSON file holds the user's connections, how to start the query worker
//! and display defaults for result panels.

mod settings_file;

pub use settings_file::*;

use anyhow::{Context, Result};
use quarry_connection::{ConnectionConfig, ConnectionFactory, ConnectionOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub connections: Vec<ConnectionConfig>,
    pub worker: WorkerSettings,
    /// Tab result panels open on
    pub default_tab: Option<String>,
    pub use_connection_cache: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connections: Vec::new(),
            worker: WorkerSettings::default(),
            default_tab: None,
            use_connection_cache: true,
        }
    }
}

/// How to start the query worker process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Executable to run; the `quarry worker` subcommand when unset
    pub command: Option<String>,
    pub args: Vec<String>,
}

impl Settings {
    /// Load from the user's settings file, or defaults if there is none
    pub fn load() -> Result<Self> {
        Self::load_from(&settings_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings JSON in {:?}", path))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&settings_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings to {:?}", path))?;
        Ok(())
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.name == name)
    }

    /// Lookup options for connections used from `working_directory`
    pub fn connection_options(&self, working_directory: Option<PathBuf>) -> ConnectionOptions {
        ConnectionOptions {
            working_directory,
            use_cache: self.use_connection_cache,
        }
    }

    /// Drop every cached connection so edited entries take effect
    pub async fn connections_changed(&self, factory: &ConnectionFactory) {
        tracing::info!(connections = self.connections.len(), "connection settings changed");
        factory.reset().await;
    }
}
