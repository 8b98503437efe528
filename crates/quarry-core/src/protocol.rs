//! Editor/worker protocol payloads
//!
//! The editor sends one [`RunRequest`] per run using the [`RUN_METHOD`]
//! request. The worker answers with a stream of [`QueryStatus`] progress
//! notifications of type [`QUERY_PROGRESS`], tagged with the request's panel id.

use serde::{Deserialize, Serialize};

use crate::{PanelId, QuerySpec};

/// Request method that starts a run on the worker
pub const RUN_METHOD: &str = "run";

/// Request method the worker uses to fetch a credential from the editor
pub const GET_SECRET_METHOD: &str = "getSecret";

/// Progress type of the staged run notifications
pub const QUERY_PROGRESS: &str = "query/progress";

/// Payload of the `run` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub query: QuerySpec,
    pub panel_id: PanelId,
    pub name: String,
    #[serde(rename = "showSQLOnly")]
    pub show_sql_only: bool,
    pub show_schema_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tab: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub estimate_cost_only: bool,
}

/// Timing of one run as measured by the worker, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRunStats {
    pub compile_time: f64,
    pub run_time: f64,
    pub total_time: f64,
}

/// Staged progress of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum QueryStatus {
    Compiling,
    Compiled {
        sql: String,
    },
    #[serde(rename_all = "camelCase")]
    EstimatedCost {
        query_cost_bytes: Option<u64>,
        schema: serde_json::Value,
    },
    Schema {
        schema: serde_json::Value,
    },
    Running {
        dialect: String,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        /// Serialized result, decoded by the editor
        result_json: String,
        stats: QueryRunStats,
        #[serde(default)]
        profiling_url: Option<String>,
        #[serde(default)]
        can_download_stream: bool,
    },
    Error {
        error: String,
    },
}

impl QueryStatus {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            QueryStatus::Compiling => "compiling",
            QueryStatus::Compiled { .. } => "compiled",
            QueryStatus::EstimatedCost { .. } => "estimatedCost",
            QueryStatus::Schema { .. } => "schema",
            QueryStatus::Running { .. } => "running",
            QueryStatus::Done { .. } => "done",
            QueryStatus::Error { .. } => "error",
        }
    }

    /// Done and Error end a run regardless of the requested mode
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryStatus::Done { .. } | QueryStatus::Error { .. })
    }
}

/// Payload of the `getSecret` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSecretRequest {
    pub key: String,
    /// Prompt to show the user when the secret is not stored yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_if_missing: Option<String>,
}

/// What a successful run resolves to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub profiling_url: Option<String>,
    pub result: serde_json::Value,
    pub stats: QueryRunStats,
}
