//! Connection backends and their registry

use async_trait::async_trait;
use quarry_core::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Connection, ConnectionConfig, SecretSource};

/// What a backend may use while building a connection
#[derive(Clone, Default)]
pub struct BackendContext {
    pub working_directory: Option<PathBuf>,
    pub secrets: Option<Arc<dyn SecretSource>>,
}

impl BackendContext {
    /// Resolve a possibly relative path against the working directory
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.working_directory {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Fetch a secret, failing when no secret source is configured
    pub async fn secret(&self, key: &str, prompt_if_missing: Option<&str>) -> Result<Option<String>> {
        match &self.secrets {
            Some(secrets) => secrets.get_secret(key, prompt_if_missing).await,
            None => {
                tracing::debug!(key, "no secret source configured");
                Ok(None)
            }
        }
    }
}

/// A family of connections, e.g. an embedded engine or a SQL server
#[async_trait]
pub trait ConnectionBackend: Send + Sync {
    /// Name configurations select this backend by
    fn name(&self) -> &str;

    /// Zero-configuration entry added when the user configured none for this backend
    fn default_config(&self) -> Option<ConnectionConfig> {
        None
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        context: &BackendContext,
    ) -> Result<Arc<dyn Connection>>;
}

/// Registry of available connection backends, in registration order
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn ConnectionBackend>>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in backends registered
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "duckdb")]
        registry.register(Arc::new(crate::DuckDbBackend::new()));
        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::PostgresBackend::new()));

        registry
    }

    /// Register a backend, replacing one with the same name
    pub fn register(&mut self, backend: Arc<dyn ConnectionBackend>) {
        tracing::info!(backend = %backend.name(), "registering connection backend");
        match self.backends.iter().position(|b| b.name() == backend.name()) {
            Some(index) => self.backends[index] = backend,
            None => self.backends.push(backend),
        }
    }

    /// Get a backend by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ConnectionBackend>> {
        let backend = self.backends.iter().find(|b| b.name() == name).cloned();
        if backend.is_none() {
            tracing::warn!(backend = %name, "backend not found in registry");
        }
        backend
    }

    /// List all registered backend names
    pub fn list(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.backends.iter().any(|b| b.name() == name)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<dyn ConnectionBackend>> {
        self.backends.iter()
    }
}
