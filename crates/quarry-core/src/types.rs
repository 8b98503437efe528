//! Identity and query description types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of one logical output location.
///
/// The same value is used as the progress token for the worker, as the key
/// of the run registry and as the key of the panel's delivery channel. Re-runs
/// of the same logical panel reuse the identity; unrelated queries never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PanelId(String);

impl PanelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a fresh identity for a one-off output location
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PanelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PanelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What to run. Opaque to the orchestrator, interpreted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QuerySpec {
    /// Run the final query of a document
    File { uri: String },
    /// Run a named query declared in a document
    Named { uri: String, name: String },
    /// Run query text in the context of a document
    Text { uri: String, text: String },
    /// Run the query at a zero-based position in a document
    Index { uri: String, index: usize },
}

impl QuerySpec {
    /// The document the query belongs to
    pub fn uri(&self) -> &str {
        match self {
            QuerySpec::File { uri }
            | QuerySpec::Named { uri, .. }
            | QuerySpec::Text { uri, .. }
            | QuerySpec::Index { uri, .. } => uri,
        }
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuerySpec::File { uri } => write!(f, "{}", uri),
            QuerySpec::Named { uri, name } => write!(f, "{}#{}", uri, name),
            QuerySpec::Text { uri, text } => {
                let preview: String = text.chars().take(40).collect();
                write!(f, "{} <{}>", uri, preview)
            }
            QuerySpec::Index { uri, index } => write!(f, "{}[{}]", uri, index),
        }
    }
}
