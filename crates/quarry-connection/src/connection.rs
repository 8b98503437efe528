//! Live connection trait

use async_trait::async_trait;
use quarry_core::Result;
use serde::{Deserialize, Serialize};

/// Rows returned by [`Connection::query_rows`], already converted to JSON values
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as objects keyed by column name
    pub fn to_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// A live connection built by a [`crate::ConnectionBackend`]
#[async_trait]
pub trait Connection: Send + Sync {
    /// Configured name of the connection
    fn name(&self) -> &str;

    /// Backend that built the connection
    fn backend(&self) -> &str;

    /// SQL dialect queries on this connection are compiled for
    fn dialect(&self) -> &str;

    /// Cheap round trip proving the connection works
    async fn test(&self) -> Result<()>;

    async fn query_rows(&self, sql: &str) -> Result<QueryRows>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
