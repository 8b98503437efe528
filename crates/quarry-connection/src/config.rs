//! Connection configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A named connection as the user configured it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Name queries refer to the connection by
    pub name: String,

    /// Backend that builds the connection (duckdb, postgres, ...)
    pub backend: String,

    /// Used when a query names no connection
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_default: bool,

    /// Added implicitly rather than by the user
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_generated: bool,

    /// Backend-specific parameters. Passwords belong in the secret store.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            is_default: false,
            is_generated: false,
            params: BTreeMap::new(),
        }
    }

    /// Set a connection parameter
    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|v| v.as_str())
    }

    pub fn generated(mut self) -> Self {
        self.is_generated = true;
        self
    }
}

/// Per-lookup options for [`crate::ConnectionFactory`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Directory relative paths in the configuration resolve against
    pub working_directory: Option<PathBuf>,

    /// Reuse a cached connection and cache newly built ones
    pub use_cache: bool,
}

impl ConnectionOptions {
    pub fn cached(working_directory: Option<PathBuf>) -> Self {
        Self {
            working_directory,
            use_cache: true,
        }
    }

    pub fn uncached(working_directory: Option<PathBuf>) -> Self {
        Self {
            working_directory,
            use_cache: false,
        }
    }

    /// Cache key for `name` under these options
    pub fn cache_key(&self, name: &str) -> String {
        let working_directory = self
            .working_directory
            .as_deref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        format!("{}::{}", name, working_directory)
    }
}
