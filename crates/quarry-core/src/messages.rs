//! Messages exchanged with a result panel's content

use serde::{Deserialize, Serialize};

use crate::QueryRunStats;

/// Command the editor runs when the panel asks to download results
pub const DOWNLOAD_RESULTS_COMMAND: &str = "quarry.downloadResults";

/// Rendering-ready message sent from the editor to a panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PanelMessage {
    Compiling,
    #[serde(rename_all = "camelCase")]
    Compiled {
        sql: String,
        show_sql_only: bool,
    },
    #[serde(rename_all = "camelCase")]
    EstimatedCost {
        query_cost_bytes: Option<u64>,
        schema: serde_json::Value,
    },
    Schema {
        schema: serde_json::Value,
    },
    Running,
    #[serde(rename_all = "camelCase")]
    Done {
        name: String,
        result: serde_json::Value,
        stats: QueryRunStats,
        default_tab: Option<String>,
        can_download_stream: bool,
        profiling_url: Option<String>,
    },
    Error {
        error: String,
    },
}

impl PanelMessage {
    /// Short name used in logs and assertions
    pub fn kind(&self) -> &'static str {
        match self {
            PanelMessage::Compiling => "compiling",
            PanelMessage::Compiled { .. } => "compiled",
            PanelMessage::EstimatedCost { .. } => "estimatedCost",
            PanelMessage::Schema { .. } => "schema",
            PanelMessage::Running => "running",
            PanelMessage::Done { .. } => "done",
            PanelMessage::Error { .. } => "error",
        }
    }
}

/// Message sent by a panel's content back to the editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PanelRequest {
    /// Sent once the content script has initialised
    Ready,
    #[serde(rename_all = "camelCase")]
    StartDownload { download_options: serde_json::Value },
    RunCommand {
        command: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
    },
}
