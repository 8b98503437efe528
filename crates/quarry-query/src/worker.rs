//! Worker-side run handler
//!
//! Serves `run` requests and emits the staged progress the editor follows:
//! `compiling`, `compiled`, then `schema`, `estimatedCost`, or `running`
//! followed by `done`. Any failure is sent as an `error` status; a cancelled
//! run stops without emitting anything further.

use async_trait::async_trait;
use quarry_core::{
    QUERY_PROGRESS, QuarryError, QueryRunStats, QuerySpec, QueryStatus, RUN_METHOD, Result,
    RunRequest,
};
use quarry_transport::{CancellationToken, Disposable, Transport, TransportExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// A query compiled for a particular connection
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub dialect: String,
    pub connection: String,
}

/// What executing a query produced
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    pub result: Value,
    pub profiling_url: Option<String>,
    pub can_download_stream: bool,
}

impl QueryOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            profiling_url: None,
            can_download_stream: false,
        }
    }
}

/// The query language runtime, seen as a black box
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn compile(&self, query: &QuerySpec) -> Result<CompiledQuery>;

    /// Shape of the result, without running the query
    async fn schema(&self, compiled: &CompiledQuery) -> Result<Value>;

    /// Bytes the query would scan, when the backend can tell
    async fn estimate_cost(&self, compiled: &CompiledQuery) -> Result<Option<u64>>;

    async fn execute(&self, compiled: &CompiledQuery) -> Result<QueryOutput>;
}

/// Serves `run` requests with a [`QueryEngine`]
pub struct QueryWorker {
    engine: Arc<dyn QueryEngine>,
    transport: Arc<dyn Transport>,
}

impl QueryWorker {
    pub fn new(engine: Arc<dyn QueryEngine>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self { engine, transport })
    }

    /// Start answering `run` requests on the transport
    pub fn serve(self: &Arc<Self>) -> Disposable {
        let worker = self.clone();
        self.transport
            .handle_request(RUN_METHOD, move |request: RunRequest, cancel: CancellationToken| {
                let worker = worker.clone();
                async move { worker.run(request, cancel).await }
            })
    }

    #[tracing::instrument(skip_all, fields(panel_id = %request.panel_id, query = %request.query))]
    async fn run(&self, request: RunRequest, cancel: CancellationToken) -> Result<Value> {
        let token = request.panel_id.to_string();
        match self.stages(&request, &token, &cancel).await {
            Ok(()) => Ok(Value::Null),
            Err(e) if e.is_cancelled() => {
                tracing::info!("run cancelled by the editor");
                Err(QuarryError::Cancelled)
            }
            Err(e) => {
                tracing::info!(error = %e, "run failed");
                self.emit(&token, QueryStatus::Error { error: error_text(&e) }).await?;
                Ok(Value::Null)
            }
        }
    }

    async fn stages(&self, request: &RunRequest, token: &str, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        self.emit(token, QueryStatus::Compiling).await?;

        let compiled = until_cancelled(cancel, self.engine.compile(&request.query)).await?;
        let compile_time = started.elapsed().as_secs_f64();
        self.emit(token, QueryStatus::Compiled { sql: compiled.sql.clone() }).await?;

        if request.show_sql_only {
            return Ok(());
        }

        if request.show_schema_only {
            let schema = until_cancelled(cancel, self.engine.schema(&compiled)).await?;
            return self.emit(token, QueryStatus::Schema { schema }).await;
        }

        if request.estimate_cost_only {
            let schema = until_cancelled(cancel, self.engine.schema(&compiled)).await?;
            let query_cost_bytes = until_cancelled(cancel, self.engine.estimate_cost(&compiled)).await?;
            return self
                .emit(
                    token,
                    QueryStatus::EstimatedCost {
                        query_cost_bytes,
                        schema,
                    },
                )
                .await;
        }

        self.emit(
            token,
            QueryStatus::Running {
                dialect: compiled.dialect.clone(),
            },
        )
        .await?;

        let run_started = Instant::now();
        let output = until_cancelled(cancel, self.engine.execute(&compiled)).await?;
        let stats = QueryRunStats {
            compile_time,
            run_time: run_started.elapsed().as_secs_f64(),
            total_time: started.elapsed().as_secs_f64(),
        };
        tracing::debug!(total_time = stats.total_time, "query executed");

        self.emit(
            token,
            QueryStatus::Done {
                result_json: serde_json::to_string(&output.result)?,
                stats,
                profiling_url: output.profiling_url,
                can_download_stream: output.can_download_stream,
            },
        )
        .await
    }

    async fn emit(&self, token: &str, status: QueryStatus) -> Result<()> {
        tracing::trace!(status = status.name(), "emitting status");
        self.transport.progress(QUERY_PROGRESS, token, &status).await
    }
}

/// Engine errors reach the user as plain text, without the taxonomy prefix
fn error_text(error: &QuarryError) -> String {
    match error {
        QuarryError::Query(message)
        | QuarryError::Connection(message)
        | QuarryError::Backend(message)
        | QuarryError::Other(message) => message.clone(),
        other => other.to_string(),
    }
}

async fn until_cancelled<T>(cancel: &CancellationToken, work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QuarryError::Cancelled),
        result = work => result,
    }
}
