//! Transport abstraction

use async_trait::async_trait;
use futures::future::BoxFuture;
use quarry_core::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::Disposable;

/// Handles an incoming request. The token fires when the peer cancels.
pub type RequestHandler =
    Arc<dyn Fn(Value, CancellationToken) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Receives progress values for one token, in the order the peer sent them.
pub type ProgressHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Bidirectional request/response connection with token-keyed progress.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its response.
    ///
    /// When `cancel` fires the peer is asked to stop and the call returns
    /// `QuarryError::Cancelled` without waiting for the peer.
    async fn send_request(
        &self,
        method: &str,
        params: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value>;

    /// Serve requests for `method`. A later registration replaces an earlier one.
    fn on_request(&self, method: &str, handler: RequestHandler) -> Disposable;

    /// Emit a progress value for `token`
    async fn send_progress(&self, progress_type: &str, token: &str, value: Value) -> Result<()>;

    /// Listen for progress values sent for `token`
    fn on_progress(&self, progress_type: &str, token: &str, handler: ProgressHandler) -> Disposable;
}

/// Typed helpers on top of [`Transport`]
#[async_trait]
pub trait TransportExt: Transport {
    async fn request<P, R>(
        &self,
        method: &str,
        params: &P,
        cancel: Option<CancellationToken>,
    ) -> Result<R>
    where
        P: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send,
    {
        let params = serde_json::to_value(params)?;
        let response = self.send_request(method, params, cancel).await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn progress<V>(&self, progress_type: &str, token: &str, value: &V) -> Result<()>
    where
        V: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        self.send_progress(progress_type, token, value).await
    }

    /// Serve `method` with a typed async handler
    fn handle_request<P, R, F, Fut>(&self, method: &str, handler: F) -> Disposable
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.on_request(
            method,
            Arc::new(move |params, cancel| {
                let handler = handler.clone();
                Box::pin(async move {
                    let params: P = serde_json::from_value(params)?;
                    let response = handler(params, cancel).await?;
                    Ok(serde_json::to_value(response)?)
                })
            }),
        )
    }

    /// Listen for typed progress values; undecodable values are logged and skipped
    fn subscribe_progress<V, F>(&self, progress_type: &str, token: &str, handler: F) -> Disposable
    where
        V: DeserializeOwned + 'static,
        F: Fn(V) + Send + Sync + 'static,
    {
        let token_name = token.to_string();
        self.on_progress(
            progress_type,
            token,
            Arc::new(move |value| match serde_json::from_value::<V>(value) {
                Ok(value) => handler(value),
                Err(e) => {
                    tracing::warn!(token = %token_name, error = %e, "ignoring malformed progress value");
                }
            }),
        )
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}
