//! Connection factory and cache


use parking_lot::RwLock;
use quarry_core::{QuarryError, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    BackendContext, BackendRegistry, Connection, ConnectionConfig, ConnectionOptions, SecretSource,
};

/// Builds connections through the registered backends and caches them per
/// `(name, working directory)`
pub struct ConnectionFactory {
    backends: BackendRegistry,
    secrets: Option<Arc<dyn SecretSource>>,
    cache: RwLock<HashMap<String, Arc<dyn Connection>>>,
}

impl ConnectionFactory {
    /// Create a factory with all built-in backends and no secret source
    pub fn new() -> Self {
        Self::with_backends(BackendRegistry::with_defaults())
    }

    pub fn with_backends(backends: BackendRegistry) -> Self {
        Self {
            backends,
            secrets: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretSource>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Get the backend registry
    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Resolve `config` to a live connection.
    ///
    /// With `use_cache` a connection built earlier for the same name and
    /// working directory is returned as is; otherwise exactly one backend is
    /// asked to build a new one. A failed build leaves the cache untouched.
    #[tracing::instrument(skip(self, config, options), fields(connection = %config.name, backend = %config.backend))]
    pub async fn get_connection_for_config(
        &self,
        config: &ConnectionConfig,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn Connection>> {
        let key = options.cache_key(&config.name);

        if options.use_cache {
            let cached = self.cache.read().get(&key).cloned();
            if let Some(connection) = cached {
                tracing::debug!(cache_key = %key, "using cached connection");
                return Ok(connection);
            }
        }

        let connection = self.build(config, options).await?;

        if options.use_cache {
            let previous = self.cache.write().insert(key.clone(), connection.clone());
            // Two concurrent misses for one key both build; the later one wins
            if let Some(previous) = previous
                && !Arc::ptr_eq(&previous, &connection)
            {
                tracing::debug!(cache_key = %key, "replacing concurrently built connection");
                if let Err(e) = previous.close().await {
                    tracing::warn!(error = %e, "failed to close replaced connection");
                }
            }
            tracing::debug!(cache_key = %key, "connection cached");
        }

        Ok(connection)
    }

    /// Build, test and close an uncached connection
    #[tracing::instrument(skip(self, config, options), fields(connection = %config.name, backend = %config.backend))]
    pub async fn test_connection(
        &self,
        config: &ConnectionConfig,
        options: &ConnectionOptions,
    ) -> Result<()> {
        tracing::debug!("testing connection");
        let connection = self.build(config, options).await?;
        let tested = connection.test().await;
        if let Err(e) = connection.close().await {
            tracing::warn!(error = %e, "failed to close tested connection");
        }
        tested
    }

    /// Close every cached connection and empty the cache
    #[tracing::instrument(skip(self))]
    pub async fn reset(&self) {
        let cached: Vec<(String, Arc<dyn Connection>)> = self.cache.write().drain().collect();
        tracing::info!(count = cached.len(), "resetting connection cache");

        for (key, connection) in cached {
            if let Err(e) = connection.close().await {
                tracing::warn!(cache_key = %key, error = %e, "failed to close cached connection");
            }
        }
    }

    /// Append each backend's zero-configuration entry when the user has no
    /// connection for that backend.
    ///
    /// The first appended entry becomes the default, unless a configured
    /// entry already is.
    pub fn add_defaults(&self, mut configs: Vec<ConnectionConfig>) -> Vec<ConnectionConfig> {
        let mut has_default = configs.iter().any(|c| c.is_default);

        for backend in self.backends.iter() {
            if configs.iter().any(|c| c.backend == backend.name()) {
                continue;
            }
            let Some(mut config) = backend.default_config() else {
                continue;
            };
            if configs.iter().any(|c| c.name == config.name) {
                tracing::debug!(connection = %config.name, "default connection name already taken");
                continue;
            }

            config.is_generated = true;
            config.is_default = !has_default;
            has_default = true;

            tracing::debug!(connection = %config.name, backend = %backend.name(), "adding default connection");
            configs.push(config);
        }

        configs
    }

    /// Number of cached connections
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    async fn build(
        &self,
        config: &ConnectionConfig,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn Connection>> {
        let backend = self
            .backends
            .get(&config.backend)
            .ok_or_else(|| QuarryError::UnknownBackend(config.backend.clone()))?;

        let context = BackendContext {
            working_directory: options.working_directory.clone(),
            secrets: self.secrets.clone(),
        };

        tracing::info!("building connection");
        backend.connect(config, &context).await.map_err(|e| {
            tracing::error!(error = %e, "failed to build connection");
            e
        })
    }
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}
