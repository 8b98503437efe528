//! Newline-delimited JSON-RPC connection
//!
//! One reader task decodes frames strictly in arrival order. Responses complete
//! the matching pending request, progress notifications are routed inline (so
//! per-token order is exactly the peer's send order), and incoming requests are
//! served on their own tasks. One writer task owns the outgoing half.


use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use quarry_core::{QuarryError, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::message::{CANCEL_NOTIFICATION, PROGRESS_NOTIFICATION, error_codes};
use crate::{
    Disposable, ProgressHandler, ProgressRouter, RequestHandler, RpcErrorObject, RpcMessage,
    Transport,
};

type PendingResponse = oneshot::Sender<Result<Value>>;

#[derive(Deserialize)]
struct ProgressParams {
    #[serde(rename = "type")]
    progress_type: String,
    token: String,
    value: Value,
}

#[derive(Deserialize)]
struct CancelParams {
    id: u64,
}

/// State shared between the connection handle and its I/O tasks
struct Shared {
    outgoing: mpsc::UnboundedSender<RpcMessage>,
    pending: Mutex<HashMap<u64, PendingResponse>>,
    handlers: RwLock<HashMap<String, (u64, RequestHandler)>>,
    incoming: Mutex<HashMap<u64, CancellationToken>>,
    progress: ProgressRouter,
    closed: CancellationToken,
    close_reason: Mutex<Option<String>>,
}

impl Shared {
    fn send(&self, message: RpcMessage) -> Result<()> {
        self.outgoing
            .send(message)
            .map_err(|_| QuarryError::WorkerCrashed(self.reason()))
    }

    fn reason(&self) -> String {
        self.close_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "connection closed".to_string())
    }

    /// Fail everything still in flight. Runs once, when either task stops.
    fn shut_down(&self, reason: String) {
        {
            let mut close_reason = self.close_reason.lock();
            if close_reason.is_some() {
                return;
            }
            *close_reason = Some(reason.clone());
        }
        tracing::warn!(reason = %reason, "rpc connection closed");

        let pending: Vec<PendingResponse> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for tx in pending {
            let _ = tx.send(Err(QuarryError::WorkerCrashed(reason.clone())));
        }
        for (_, token) in self.incoming.lock().drain() {
            token.cancel();
        }
        self.closed.cancel();
    }

    fn dispatch(self: &Arc<Self>, message: RpcMessage) {
        match message {
            RpcMessage::Response { id, result } => {
                let pending = self.pending.lock().remove(&id);
                match pending {
                    Some(tx) => {
                        let _ = tx.send(result.map_err(RpcErrorObject::into_error));
                    }
                    None => tracing::debug!(id, "response for unknown or abandoned request"),
                }
            }
            RpcMessage::Notification { method, params } => self.dispatch_notification(&method, params),
            RpcMessage::Request { id, method, params } => self.serve_request(id, method, params),
        }
    }

    fn dispatch_notification(&self, method: &str, params: Value) {
        match method {
            PROGRESS_NOTIFICATION => match serde_json::from_value::<ProgressParams>(params) {
                Ok(progress) => {
                    self.progress
                        .dispatch(&progress.progress_type, &progress.token, progress.value);
                }
                Err(e) => tracing::warn!(error = %e, "malformed progress notification"),
            },
            CANCEL_NOTIFICATION => match serde_json::from_value::<CancelParams>(params) {
                Ok(CancelParams { id }) => {
                    if let Some(token) = self.incoming.lock().get(&id) {
                        tracing::debug!(id, "peer cancelled request");
                        token.cancel();
                    }
                }
                Err(e) => tracing::warn!(error = %e, "malformed cancel notification"),
            },
            other => tracing::debug!(method = %other, "ignoring unknown notification"),
        }
    }

    fn serve_request(self: &Arc<Self>, id: u64, method: String, params: Value) {
        let handler = self.handlers.read().get(&method).map(|(_, h)| h.clone());
        let Some(handler) = handler else {
            tracing::warn!(id, method = %method, "no handler for request");
            let _ = self.send(RpcMessage::Response {
                id,
                result: Err(RpcErrorObject::new(
                    error_codes::METHOD_NOT_FOUND,
                    format!("Unhandled method {}", method),
                )),
            });
            return;
        };

        let cancel = CancellationToken::new();
        self.incoming.lock().insert(id, cancel.clone());

        let shared = self.clone();
        tokio::spawn(async move {
            tracing::debug!(id, method = %method, "serving request");
            let result = handler(params, cancel).await;
            shared.incoming.lock().remove(&id);

            let result = result.map_err(|e| {
                if !e.is_cancelled() {
                    tracing::warn!(id, method = %method, error = %e, "request handler failed");
                }
                RpcErrorObject::from_error(&e)
            });
            let _ = shared.send(RpcMessage::Response { id, result });
        });
    }
}

/// JSON-RPC peer over a pair of byte streams.
///
/// Must be created inside a Tokio runtime; it spawns its reader and writer
/// tasks immediately.
pub struct RpcConnection {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    next_handler: AtomicU64,
}

impl RpcConnection {
    pub fn new<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<RpcMessage>();
        let shared = Arc::new(Shared {
            outgoing,
            pending: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            incoming: Mutex::new(HashMap::new()),
            progress: ProgressRouter::new(),
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
        });

        let writer_shared = shared.clone();
        tokio::spawn(async move {
            let mut sink = FramedWrite::new(writer, LinesCodec::new());
            loop {
                let message = tokio::select! {
                    message = outgoing_rx.recv() => message,
                    _ = writer_shared.closed.cancelled() => None,
                };
                let Some(message) = message else { break };

                let line = match message.encode() {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(line).await {
                    writer_shared.shut_down(format!("write failed: {}", e));
                    break;
                }
            }
        });

        let reader_shared = shared.clone();
        tokio::spawn(async move {
            let mut frames = FramedRead::new(reader, LinesCodec::new());
            let reason = loop {
                let frame = tokio::select! {
                    frame = frames.next() => frame,
                    _ = reader_shared.closed.cancelled() => break "connection closed locally".to_string(),
                };
                match frame {
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match RpcMessage::decode(&line) {
                            Ok(message) => reader_shared.dispatch(message),
                            Err(e) => tracing::warn!(error = %e, "dropping undecodable frame"),
                        }
                    }
                    Some(Err(e)) => break format!("read failed: {}", e),
                    None => break "peer closed the connection".to_string(),
                }
            };
            reader_shared.shut_down(reason);
        });

        Arc::new(Self {
            shared,
            next_id: AtomicU64::new(1),
            next_handler: AtomicU64::new(1),
        })
    }

    /// Two connected peers over an in-memory pipe
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        (
            Self::new(left_read, left_write),
            Self::new(right_read, right_write),
        )
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Resolves once the connection has stopped, for whatever reason
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    /// Stop both I/O tasks and fail all in-flight requests
    pub fn close(&self) {
        self.shared.shut_down("connection closed locally".to_string());
    }

    pub fn progress_listener_count(&self, progress_type: &str, token: &str) -> usize {
        self.shared.progress.listener_count(progress_type, token)
    }
}

#[async_trait]
impl Transport for RpcConnection {
    #[tracing::instrument(skip(self, params, cancel), fields(request_id))]
    async fn send_request(
        &self,
        method: &str,
        params: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(QuarryError::WorkerCrashed(self.shared.reason()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::Span::current().record("request_id", id);

        // Register before sending so a fast response cannot be missed
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        if let Err(e) = self.shared.send(RpcMessage::Request {
            id,
            method: method.to_string(),
            params,
        }) {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }

        let cancel = cancel.unwrap_or_default();
        tokio::select! {
            biased;
            response = rx => response.unwrap_or_else(|_| Err(QuarryError::WorkerCrashed(self.shared.reason()))),
            _ = cancel.cancelled() => {
                self.shared.pending.lock().remove(&id);
                tracing::debug!(id, "request cancelled locally");
                let _ = self
                    .shared
                    .send(RpcMessage::notification(CANCEL_NOTIFICATION, json!({ "id": id })));
                Err(QuarryError::Cancelled)
            }
        }
    }

    fn on_request(&self, method: &str, handler: RequestHandler) -> Disposable {
        let registration = self.next_handler.fetch_add(1, Ordering::SeqCst);
        self.shared
            .handlers
            .write()
            .insert(method.to_string(), (registration, handler));

        let shared = Arc::downgrade(&self.shared);
        let method = method.to_string();
        Disposable::new(move || {
            let Some(shared) = shared.upgrade() else { return };
            let mut handlers = shared.handlers.write();
            // Only remove our own registration, not a later replacement
            if handlers.get(&method).is_some_and(|(r, _)| *r == registration) {
                handlers.remove(&method);
            }
        })
    }

    async fn send_progress(&self, progress_type: &str, token: &str, value: Value) -> Result<()> {
        self.shared.send(RpcMessage::notification(
            PROGRESS_NOTIFICATION,
            json!({ "type": progress_type, "token": token, "value": value }),
        ))
    }

    fn on_progress(&self, progress_type: &str, token: &str, handler: ProgressHandler) -> Disposable {
        self.shared.progress.subscribe(progress_type, token, handler)
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.shared.shut_down("connection dropped".to_string());
    }
}
