//! State machine of one run
//!
//! Every way a run can end goes through [`ActiveRun::claim`], which hands out
//! the settle sender exactly once and drops the progress subscription before
//! anything user visible happens. Statuses arriving after that are ignored.

use parking_lot::Mutex;
use quarry_core::{
    PanelId, PanelMessage, QuarryError, QueryRunStats, QuerySpec, QueryStatus, Result, RunResult,
};
use quarry_panel::{RunRegistry, RunState};
use quarry_transport::{CancellationToken, Disposable};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;

use crate::followup::follow_up_handler;
use crate::{CommandExecutor, ProgressReport, ProgressSink, QueryUsage, RunOptions};

pub(crate) type RunOutcome = Result<Option<RunResult>>;

/// Shown when the worker goes away in the middle of a run
pub(crate) fn worker_restarted_message(error: &QuarryError) -> String {
    format!(
        "The query worker stopped unexpectedly and has been restarted. \
         This may indicate a bug in a connection backend. ({})",
        error
    )
}

pub(crate) struct ActiveRun {
    pub(crate) panel_id: PanelId,
    pub(crate) name: String,
    pub(crate) query: QuerySpec,
    pub(crate) options: RunOptions,
    /// Fires when the run is cancelled for any reason; aborts the `run` request
    pub(crate) cancel: CancellationToken,
    /// Fires once the run has settled
    pub(crate) finished: CancellationToken,
    /// Fires once the `run` request is over, or when it was never sent
    pub(crate) released: CancellationToken,
    pub(crate) state: Option<Arc<RunState>>,
    generation: AtomicU64,
    registry: Arc<RunRegistry>,
    commands: Arc<dyn CommandExecutor>,
    usage: Arc<QueryUsage>,
    progress: Option<Arc<dyn ProgressSink>>,
    settle: Mutex<Option<oneshot::Sender<RunOutcome>>>,
    subscription: Mutex<Option<Disposable>>,
    /// Serializes status handling against cancellation
    turn: Mutex<()>,
    started: Instant,
}

pub(crate) struct ActiveRunParts {
    pub(crate) panel_id: PanelId,
    pub(crate) name: String,
    pub(crate) query: QuerySpec,
    pub(crate) options: RunOptions,
    pub(crate) state: Option<Arc<RunState>>,
    pub(crate) registry: Arc<RunRegistry>,
    pub(crate) commands: Arc<dyn CommandExecutor>,
    pub(crate) usage: Arc<QueryUsage>,
    pub(crate) progress: Option<Arc<dyn ProgressSink>>,
}

impl ActiveRun {
    pub(crate) fn new(parts: ActiveRunParts) -> (Arc<Self>, oneshot::Receiver<RunOutcome>) {
        let (settle, settled) = oneshot::channel();
        let run = Arc::new(Self {
            panel_id: parts.panel_id,
            name: parts.name,
            query: parts.query,
            options: parts.options,
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            released: CancellationToken::new(),
            state: parts.state,
            generation: AtomicU64::new(0),
            registry: parts.registry,
            commands: parts.commands,
            usage: parts.usage,
            progress: parts.progress,
            settle: Mutex::new(Some(settle)),
            subscription: Mutex::new(None),
            turn: Mutex::new(()),
            started: Instant::now(),
        });
        (run, settled)
    }

    pub(crate) fn set_generation(&self, generation: u64) {
        self.generation.store(generation, Ordering::SeqCst);
    }

    pub(crate) fn set_subscription(&self, subscription: Disposable) {
        if self.is_finished() {
            subscription.dispose();
            return;
        }
        *self.subscription.lock() = Some(subscription);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    fn has_panel(&self) -> bool {
        self.state.is_some()
    }

    /// Take the right to settle the run. `None` if it already settled.
    fn claim(&self) -> Option<oneshot::Sender<RunOutcome>> {
        let settle = self.settle.lock().take()?;
        self.finished.cancel();

        if let Some(subscription) = self.subscription.lock().take() {
            subscription.dispose();
        }
        if let Some(state) = &self.state {
            state.finish_run(self.generation.load(Ordering::SeqCst));
        }
        Some(settle)
    }

    fn post(&self, message: PanelMessage) {
        if let Some(state) = &self.state {
            tracing::trace!(panel_id = %self.panel_id, kind = message.kind(), "posting to panel");
            state.channel.post_message(message);
        }
    }

    fn report(&self, increment: u32, message: &str) {
        if let Some(progress) = &self.progress {
            progress.report(ProgressReport::new(increment, message));
        }
    }

    fn install_follow_ups(&self) {
        if let Some(state) = &self.state {
            state.channel.on_receive_message(follow_up_handler(
                self.commands.clone(),
                self.query.clone(),
                self.panel_id.clone(),
                self.name.clone(),
            ));
        }
    }

    /// Resolve with no result, unless already settled
    fn finish_quietly(&self) {
        if let Some(settle) = self.claim() {
            let _ = settle.send(Ok(None));
        }
    }

    /// Report a failure: in the panel when there is one, to the caller otherwise
    fn fail(&self, error: String) {
        let Some(settle) = self.claim() else { return };
        if self.has_panel() {
            self.post(PanelMessage::Error { error });
            let _ = settle.send(Ok(None));
        } else {
            let _ = settle.send(Err(QuarryError::Query(error)));
        }
    }

    /// React to one staged status from the worker
    pub(crate) fn handle_status(&self, status: QueryStatus) {
        let _turn = self.turn.lock();
        if self.is_finished() {
            tracing::trace!(panel_id = %self.panel_id, status = status.name(), "status after run finished, ignoring");
            return;
        }
        tracing::debug!(panel_id = %self.panel_id, status = status.name(), "run status");

        match status {
            QueryStatus::Compiling => {
                self.report(20, "Compiling");
                self.post(PanelMessage::Compiling);
            }
            QueryStatus::Compiled { sql } => {
                tracing::debug!(panel_id = %self.panel_id, sql = %sql, "query compiled");
                self.post(PanelMessage::Compiled {
                    sql,
                    show_sql_only: self.options.show_sql_only,
                });
                if self.options.show_sql_only {
                    self.finish_quietly();
                }
            }
            QueryStatus::EstimatedCost {
                query_cost_bytes,
                schema,
            } => {
                self.post(PanelMessage::EstimatedCost {
                    query_cost_bytes,
                    schema,
                });
                // Only a cost preview ends here; full runs continue to Schema/Running
                if self.options.estimate_cost_only {
                    self.finish_quietly();
                }
            }
            QueryStatus::Schema { schema } => {
                self.post(PanelMessage::Schema { schema });
                if self.options.show_schema_only {
                    self.install_follow_ups();
                    self.finish_quietly();
                }
            }
            QueryStatus::Running { dialect } => {
                self.report(40, "Running");
                self.usage.record(&dialect);
                self.post(PanelMessage::Running);
            }
            QueryStatus::Done {
                result_json,
                stats,
                profiling_url,
                can_download_stream,
            } => self.handle_done(result_json, stats, profiling_url, can_download_stream),
            QueryStatus::Error { error } => {
                tracing::info!(panel_id = %self.panel_id, error = %error, "run failed");
                self.fail(error);
            }
        }
    }

    fn handle_done(
        &self,
        result_json: String,
        stats: QueryRunStats,
        profiling_url: Option<String>,
        can_download_stream: bool,
    ) {
        let result: Value = match serde_json::from_str(&result_json) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(panel_id = %self.panel_id, error = %e, "undecodable result payload");
                self.fail(format!("Could not read the query result: {}", e));
                return;
            }
        };

        let Some(settle) = self.claim() else { return };

        let elapsed = self.started.elapsed();
        tracing::info!(
            panel_id = %self.panel_id,
            compile_time = stats.compile_time,
            run_time = stats.run_time,
            total_time = stats.total_time,
            round_trip_ms = elapsed.as_millis() as u64,
            "run finished"
        );

        self.post(PanelMessage::Done {
            name: self.name.clone(),
            result: result.clone(),
            stats,
            default_tab: self.options.default_tab.clone(),
            can_download_stream,
            profiling_url: profiling_url.clone(),
        });
        self.install_follow_ups();

        let _ = settle.send(Ok(Some(RunResult {
            profiling_url,
            result,
            stats,
        })));
    }

    /// The `run` request came back
    pub(crate) fn handle_response(&self, response: Result<Value>) {
        let _turn = self.turn.lock();
        match response {
            Ok(_) => {
                if !self.is_finished() {
                    tracing::warn!(panel_id = %self.panel_id, "worker answered without a final status");
                    self.finish_quietly();
                }
            }
            // Whoever cancelled has already settled the run
            Err(e) if e.is_cancelled() => self.finish_quietly(),
            Err(e) if e.is_transport_failure() => {
                tracing::error!(panel_id = %self.panel_id, error = %e, "worker connection lost during run");
                let message = worker_restarted_message(&e);
                let Some(settle) = self.claim() else { return };
                if self.has_panel() {
                    self.post(PanelMessage::Error { error: message });
                    let _ = settle.send(Ok(None));
                } else {
                    let _ = settle.send(Err(QuarryError::Other(message)));
                }
            }
            Err(e) => {
                tracing::error!(panel_id = %self.panel_id, error = %e, "run request failed");
                self.fail(e.to_string());
            }
        }
    }

    /// Stop the run and resolve with no result.
    ///
    /// With `dispose_panel` the panel is closed too, but only while this run
    /// still owns it; a newer run on the same identity keeps its panel.
    pub(crate) fn cancel(&self, dispose_panel: bool) {
        self.cancel.cancel();

        let _turn = self.turn.lock();
        let Some(settle) = self.claim() else { return };
        tracing::info!(panel_id = %self.panel_id, dispose_panel, "run cancelled");

        if dispose_panel && let Some(state) = &self.state {
            let generation = self.generation.load(Ordering::SeqCst);
            if state.is_current(generation) && self.registry.is_registered(state) {
                tracing::debug!(panel_id = %self.panel_id, "disposing panel of cancelled run");
                self.registry.clear_if_current(&self.panel_id, state);
                state.channel.dispose();
                state.panel.dispose();
            } else {
                tracing::debug!(panel_id = %self.panel_id, "panel owned by a newer run, keeping it");
            }
        }

        let _ = settle.send(Ok(None));
    }
}
