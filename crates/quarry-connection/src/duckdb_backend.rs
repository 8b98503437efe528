//! Embedded DuckDB backend

use async_trait::async_trait;
use quarry_core::{QuarryError, Result};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{BackendContext, Connection, ConnectionBackend, ConnectionConfig, QueryRows};

const IN_MEMORY: &str = ":memory:";

/// Backend for the embedded DuckDB engine.
///
/// Needs no configuration, so it contributes a default `duckdb` connection
/// backed by an in-memory database.
pub struct DuckDbBackend;

impl DuckDbBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DuckDbBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionBackend for DuckDbBackend {
    fn name(&self) -> &str {
        "duckdb"
    }

    fn default_config(&self) -> Option<ConnectionConfig> {
        Some(ConnectionConfig::new("duckdb", "duckdb"))
    }

    #[tracing::instrument(skip(self, config, context), fields(connection = %config.name))]
    async fn connect(
        &self,
        config: &ConnectionConfig,
        context: &BackendContext,
    ) -> Result<Arc<dyn Connection>> {
        let path = match config.get_param("database").or_else(|| config.get_param("path")) {
            None | Some(IN_MEMORY) => IN_MEMORY.to_string(),
            Some(path) => context.resolve_path(path).display().to_string(),
        };
        tracing::debug!(path = %path, "opening DuckDB database");

        let connection = duckdb::Connection::open(&path)
            .map_err(|e| QuarryError::Connection(format!("Failed to open DuckDB database: {}", e)))?;

        Ok(Arc::new(DuckDbConnection::new(connection, &config.name, path)))
    }
}

/// DuckDB connection wrapper implementing the Connection trait
pub struct DuckDbConnection {
    connection: std::sync::Mutex<duckdb::Connection>,
    name: String,
    path: String,
    closed: AtomicBool,
}

impl DuckDbConnection {
    pub fn new(connection: duckdb::Connection, name: &str, path: String) -> Self {
        Self {
            connection: std::sync::Mutex::new(connection),
            name: name.to_string(),
            path,
            closed: AtomicBool::new(false),
        }
    }

    /// Get the database path
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_memory(&self) -> bool {
        self.path == IN_MEMORY
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QuarryError::Connection("Connection is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for DuckDbConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        "duckdb"
    }

    fn dialect(&self) -> &str {
        "duckdb"
    }

    async fn test(&self) -> Result<()> {
        self.query_rows("SELECT 1").await.map(|_| ())
    }

    async fn query_rows(&self, sql: &str) -> Result<QueryRows> {
        self.ensure_not_closed()?;
        let start = std::time::Instant::now();

        let conn = self
            .connection
            .lock()
            .map_err(|e| QuarryError::Backend(format!("Lock poisoned: {}", e)))?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| QuarryError::Query(format!("Prepare failed: {}", e)))?;

        let mut duckdb_rows = stmt
            .query([])
            .map_err(|e| QuarryError::Query(format!("Query failed: {}", e)))?;

        // Column names are only known once the statement has run
        let columns: Vec<String> = duckdb_rows
            .as_ref()
            .map(|s| s.column_names().iter().map(|c| c.to_string()).collect())
            .unwrap_or_default();

        let mut rows: Vec<Vec<Value>> = Vec::new();
        while let Some(row) = duckdb_rows
            .next()
            .map_err(|e| QuarryError::Query(format!("Row fetch failed: {}", e)))?
        {
            rows.push((0..columns.len()).map(|i| cell_to_json(row, i)).collect());
        }

        tracing::debug!(
            row_count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "query completed"
        );
        Ok(QueryRows { columns, rows })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!(connection = %self.name, "DuckDB connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn cell_to_json(row: &duckdb::Row, idx: usize) -> Value {
    if let Ok(v) = row.get::<_, Option<i64>>(idx) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.get::<_, Option<f64>>(idx) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.get::<_, Option<bool>>(idx) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.get::<_, Option<String>>(idx) {
        return v.map_or(Value::Null, Value::from);
    }
    Value::Null
}

impl std::fmt::Debug for DuckDbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbConnection")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
