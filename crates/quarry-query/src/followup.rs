//! Follow-up requests from a result panel
//!
//! After results or a schema are shown the panel may ask for a download or
//! for an editor command. Neither is interpreted here; both go to the
//! editor's generic command execution.

use async_trait::async_trait;
use quarry_core::{DOWNLOAD_RESULTS_COMMAND, PanelId, PanelRequest, QuerySpec, Result};
use serde_json::{Value, json};
use std::sync::Arc;

/// The editor's generic command execution capability
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute_command(&self, command: &str, args: Vec<Value>) -> Result<Value>;
}

/// Executor that only logs, for hosts without commands
#[derive(Debug, Default)]
pub struct NoopCommands;

#[async_trait]
impl CommandExecutor for NoopCommands {
    async fn execute_command(&self, command: &str, _args: Vec<Value>) -> Result<Value> {
        tracing::info!(command = %command, "no command executor, ignoring command");
        Ok(Value::Null)
    }
}

/// Where a panel request should go, as `(command, args)`
pub(crate) fn command_for(
    request: PanelRequest,
    query: &QuerySpec,
    panel_id: &PanelId,
    name: &str,
) -> Option<(String, Vec<Value>)> {
    match request {
        PanelRequest::StartDownload { download_options } => Some((
            DOWNLOAD_RESULTS_COMMAND.to_string(),
            vec![download_options, json!(query), json!(panel_id), json!(name)],
        )),
        PanelRequest::RunCommand { command, args } => Some((command, args)),
        PanelRequest::Ready => None,
    }
}

/// Build the panel's inbound handler for a finished run
pub(crate) fn follow_up_handler(
    commands: Arc<dyn CommandExecutor>,
    query: QuerySpec,
    panel_id: PanelId,
    name: String,
) -> impl Fn(PanelRequest) + Send + Sync + 'static {
    move |request| {
        let Some((command, args)) = command_for(request, &query, &panel_id, &name) else {
            return;
        };
        tracing::debug!(panel_id = %panel_id, command = %command, "forwarding panel command");

        let commands = commands.clone();
        tokio::spawn(async move {
            if let Err(e) = commands.execute_command(&command, args).await {
                tracing::warn!(command = %command, error = %e, "panel command failed");
            }
        });
    }
}
