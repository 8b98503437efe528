//! Query run orchestration

use quarry_core::{
    PanelId, PanelRequest, QUERY_PROGRESS, QuarryError, QuerySpec, QueryStatus, RUN_METHOD, Result,
    RunRequest, RunResult,
};
use quarry_panel::{PanelChannel, PanelEvent, PanelEvents, PanelHost, RunRegistry, RunState};
use parking_lot::Mutex;
use quarry_transport::{CancellationToken, Transport, TransportExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use crate::active_run::{ActiveRun, ActiveRunParts};
use crate::{CommandExecutor, ProgressSink, QueryUsage};

/// How a run should be carried out and shown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop after compiling and show the generated SQL
    pub show_sql_only: bool,
    /// Stop once the result schema is known
    pub show_schema_only: bool,
    /// Render into a result panel; without one errors are returned to the caller
    pub with_webview: bool,
    /// Tab the panel opens results in
    pub default_tab: Option<String>,
    /// Stop once the cost estimate is known
    pub estimate_cost_only: bool,
}

impl RunOptions {
    pub fn with_webview() -> Self {
        Self {
            with_webview: true,
            ..Self::default()
        }
    }
}

/// Latest run per identity, with or without a panel.
///
/// The identity doubles as the progress token, so two live runs on one
/// identity would hear each other's statuses.
#[derive(Default)]
struct InFlight {
    runs: Mutex<HashMap<PanelId, Weak<ActiveRun>>>,
}

impl InFlight {
    /// Make `run` the latest run for its identity, returning the one it replaces
    fn replace(&self, run: &Arc<ActiveRun>) -> Option<Arc<ActiveRun>> {
        self.runs
            .lock()
            .insert(run.panel_id.clone(), Arc::downgrade(run))
            .and_then(|previous| previous.upgrade())
    }

    fn release(&self, run: &Arc<ActiveRun>) {
        let mut runs = self.runs.lock();
        if runs
            .get(&run.panel_id)
            .is_some_and(|latest| latest.as_ptr() == Arc::as_ptr(run))
        {
            runs.remove(&run.panel_id);
        }
    }
}

/// Releases a run whose `run` request was never sent, including when the
/// caller drops `run_query` while it waits on a displaced run
struct Unsent<'a> {
    run: Option<Arc<ActiveRun>>,
    in_flight: &'a InFlight,
}

impl Drop for Unsent<'_> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.cancel(false);
            run.released.cancel();
            self.in_flight.release(&run);
        }
    }
}

/// Drives runs end to end on behalf of the editor.
///
/// At most one run is active per panel identity; starting another one on the
/// same identity cancels the first and reuses its panel.
pub struct QueryRunner {
    transport: Arc<dyn Transport>,
    panels: Arc<dyn PanelHost>,
    commands: Arc<dyn CommandExecutor>,
    registry: Arc<RunRegistry>,
    in_flight: Arc<InFlight>,
    usage: Arc<QueryUsage>,
}

impl QueryRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        panels: Arc<dyn PanelHost>,
        commands: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            transport,
            panels,
            commands,
            registry: Arc::new(RunRegistry::new()),
            in_flight: Arc::new(InFlight::default()),
            usage: Arc::new(QueryUsage::new()),
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Runs that reached the running stage, per dialect
    pub fn usage(&self) -> BTreeMap<String, u64> {
        self.usage.snapshot()
    }

    /// Run `query` and show it in the panel for `panel_id`.
    ///
    /// Resolves with the result of a completed run, with `None` when the run
    /// was cancelled, superseded or stopped early by one of the "only" modes,
    /// or when a failure was shown in the panel. Fails only for runs without
    /// a panel.
    #[tracing::instrument(skip_all, fields(panel_id = %panel_id, query = %query))]
    pub async fn run_query(
        &self,
        query: QuerySpec,
        panel_id: PanelId,
        name: &str,
        options: RunOptions,
        cancel: CancellationToken,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<Option<RunResult>> {
        let state = if options.with_webview {
            Some(self.acquire_panel(&panel_id, name).await?)
        } else {
            None
        };

        let (run, settled) = ActiveRun::new(ActiveRunParts {
            panel_id: panel_id.clone(),
            name: name.to_string(),
            query: query.clone(),
            options: options.clone(),
            state: state.clone(),
            registry: self.registry.clone(),
            commands: self.commands.clone(),
            usage: self.usage.clone(),
            progress,
        });

        let previous = self.in_flight.replace(&run);
        let mut unsent = Unsent {
            run: Some(run.clone()),
            in_flight: &self.in_flight,
        };

        if let Some(state) = &state {
            // Stale follow-ups must not act on the new run's results
            state.channel.on_receive_message(|_: PanelRequest| {});

            let weak: Weak<ActiveRun> = Arc::downgrade(&run);
            let generation = state.begin_run(Box::new(move || {
                if let Some(run) = weak.upgrade() {
                    run.cancel(false);
                }
            }));
            run.set_generation(generation);
        }

        // The panel's cancel slot only covers runs shown in that panel
        if let Some(previous) = previous {
            tracing::debug!("cancelling previous run on this identity");
            previous.cancel(false);
            // Its `$/cancelRequest` goes out before our `run`
            previous.released.cancelled().await;
        }

        if cancel.is_cancelled() {
            tracing::debug!("caller cancelled before the run started");
            run.cancel(true);
        }
        if run.is_finished() {
            drop(unsent);
            return settled.await.unwrap_or(Ok(None));
        }

        // Listen before asking, so the first status cannot be missed
        let listener = run.clone();
        let subscription = self.transport.subscribe_progress(
            QUERY_PROGRESS,
            panel_id.as_str(),
            move |status: QueryStatus| listener.handle_status(status),
        );
        run.set_subscription(subscription);

        let watched = run.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => watched.cancel(true),
                _ = watched.finished.cancelled() => {}
            }
        });

        let request = RunRequest {
            query,
            panel_id,
            name: name.to_string(),
            show_sql_only: options.show_sql_only,
            show_schema_only: options.show_schema_only,
            default_tab: options.default_tab,
            estimate_cost_only: options.estimate_cost_only,
        };
        unsent.run = None;
        let transport = self.transport.clone();
        let in_flight = self.in_flight.clone();
        let requester = run.clone();
        tokio::spawn(async move {
            let response = transport
                .request::<_, Value>(RUN_METHOD, &request, Some(requester.cancel.clone()))
                .await;
            requester.handle_response(response);
            requester.released.cancel();
            in_flight.release(&requester);
        });

        settled
            .await
            .unwrap_or_else(|_| Err(QuarryError::Other("run ended without settling".to_string())))
    }

    /// Reuse the identity's panel or create one
    async fn acquire_panel(&self, panel_id: &PanelId, name: &str) -> Result<Arc<RunState>> {
        if let Some(state) = self.registry.get(panel_id) {
            if !state.panel.is_disposed() {
                tracing::debug!(panel_id = %panel_id, "reusing panel");
                state.panel.set_title(name);
                state.panel.reveal();
                return Ok(state);
            }
            self.registry.clear_if_current(panel_id, &state);
        }

        tracing::debug!(panel_id = %panel_id, "creating panel");
        let (panel, events) = self.panels.create_panel(panel_id, name).await?;

        let sink = panel.clone();
        let channel = Arc::new(PanelChannel::new(move |message| sink.post_message(message)));
        channel.set_panel_visible(panel.is_visible());

        let state = Arc::new(RunState::new(panel_id.clone(), panel, channel));
        if let Some(replaced) = self.registry.set(panel_id.clone(), state.clone()) {
            // Lost a race with a concurrent run on the same identity
            tracing::warn!(panel_id = %panel_id, "replacing panel registered concurrently");
            replaced.cancel_active();
        }

        tokio::spawn(pump_panel_events(events, state.clone(), self.registry.clone()));
        Ok(state)
    }
}

/// Feed one panel's host events into its channel until the panel is closed
async fn pump_panel_events(mut events: PanelEvents, state: Arc<RunState>, registry: Arc<RunRegistry>) {
    while let Some(event) = events.recv().await {
        match event {
            PanelEvent::VisibilityChanged(visible) => {
                tracing::trace!(panel_id = %state.panel_id, visible, "panel visibility changed");
                state.channel.set_panel_visible(visible);
            }
            PanelEvent::Message(request) => state.channel.receive(request),
            PanelEvent::Disposed => {
                tracing::debug!(panel_id = %state.panel_id, active_run = state.has_active_run(), "panel closed");
                state.cancel_active();
                state.channel.dispose();
                registry.clear_if_current(&state.panel_id, &state);
                break;
            }
        }
    }
}
