//! Secret lookup

use async_trait::async_trait;
use quarry_core::{GET_SECRET_METHOD, GetSecretRequest, Result};
use quarry_transport::{Transport, TransportExt};
use std::collections::HashMap;
use std::sync::Arc;

/// Where backends fetch credentials from
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// `Ok(None)` when the secret is not stored and the user supplied none
    async fn get_secret(&self, key: &str, prompt_if_missing: Option<&str>) -> Result<Option<String>>;
}

/// Asks the editor on the other end of the transport
pub struct TransportSecrets {
    transport: Arc<dyn Transport>,
}

impl TransportSecrets {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SecretSource for TransportSecrets {
    #[tracing::instrument(skip(self, prompt_if_missing))]
    async fn get_secret(&self, key: &str, prompt_if_missing: Option<&str>) -> Result<Option<String>> {
        let request = GetSecretRequest {
            key: key.to_string(),
            prompt_if_missing: prompt_if_missing.map(str::to_string),
        };
        let secret: Option<String> = self
            .transport
            .request(GET_SECRET_METHOD, &request, None)
            .await?;
        tracing::debug!(found = secret.is_some(), "secret lookup finished");
        Ok(secret)
    }
}

/// Fixed in-memory secrets
#[derive(Clone, Debug, Default)]
pub struct StaticSecrets {
    secrets: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(|s| s.as_str())
    }
}

#[async_trait]
impl SecretSource for StaticSecrets {
    async fn get_secret(&self, key: &str, _prompt_if_missing: Option<&str>) -> Result<Option<String>> {
        Ok(self.secrets.get(key).cloned())
    }
}
