//! Plain SQL engine over configured connections
//!
//! Documents are sequences of `;`-separated statements. A `-- name: <name>`
//! line names the statement it belongs to, and a `-- connection: <name>` line
//! anywhere in the document picks the connection; otherwise the default
//! connection is used.

use async_trait::async_trait;
use quarry_connection::{Connection, ConnectionConfig, ConnectionFactory, ConnectionOptions};
use quarry_core::{QuarryError, QuerySpec, Result};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::{CompiledQuery, QueryEngine, QueryOutput};

const NAME_PRAGMA: &str = "-- name:";
const CONNECTION_PRAGMA: &str = "-- connection:";

/// [`QueryEngine`] that runs SQL documents as written
pub struct SqlEngine {
    factory: Arc<ConnectionFactory>,
    connections: Vec<ConnectionConfig>,
    options: ConnectionOptions,
}

impl SqlEngine {
    /// `connections` should already include the backends' defaults
    pub fn new(
        factory: Arc<ConnectionFactory>,
        connections: Vec<ConnectionConfig>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            factory,
            connections,
            options,
        }
    }

    async fn document(&self, query: &QuerySpec) -> Result<String> {
        if let QuerySpec::Text { text, .. } = query {
            return Ok(text.clone());
        }
        let uri = query.uri();
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| QuarryError::NotFound(format!("Could not read {}: {}", uri, e)))
    }

    fn connection_config(&self, name: Option<&str>) -> Result<&ConnectionConfig> {
        let found = match name {
            Some(name) => self.connections.iter().find(|c| c.name == name),
            None => self
                .connections
                .iter()
                .find(|c| c.is_default)
                .or_else(|| self.connections.first()),
        };
        found.ok_or_else(|| match name {
            Some(name) => QuarryError::Configuration(format!("No connection named \"{}\"", name)),
            None => QuarryError::Configuration("No connection configured".to_string()),
        })
    }

    async fn connection(&self, name: Option<&str>) -> Result<Arc<dyn Connection>> {
        let config = self.connection_config(name)?;
        self.factory.get_connection_for_config(config, &self.options).await
    }
}

#[async_trait]
impl QueryEngine for SqlEngine {
    #[tracing::instrument(skip_all, fields(query = %query))]
    async fn compile(&self, query: &QuerySpec) -> Result<CompiledQuery> {
        let document = self.document(query).await?;
        let statements = split_statements(&document);
        let sql = select_statement(&statements, query)?;

        let connection_name = pragma(&document, CONNECTION_PRAGMA);
        let connection = self.connection(connection_name).await?;
        tracing::debug!(connection = %connection.name(), statements = statements.len(), "query compiled");

        Ok(CompiledQuery {
            sql,
            dialect: connection.dialect().to_string(),
            connection: connection.name().to_string(),
        })
    }

    async fn schema(&self, compiled: &CompiledQuery) -> Result<Value> {
        let connection = self.connection(Some(&compiled.connection)).await?;
        let probe = format!("SELECT * FROM ({}) AS quarry_schema LIMIT 0", compiled.sql);
        let rows = connection.query_rows(&probe).await?;
        Ok(json!({ "fields": rows.columns.iter().map(|c| json!({"name": c})).collect::<Vec<_>>() }))
    }

    async fn estimate_cost(&self, _compiled: &CompiledQuery) -> Result<Option<u64>> {
        Ok(None)
    }

    async fn execute(&self, compiled: &CompiledQuery) -> Result<QueryOutput> {
        let connection = self.connection(Some(&compiled.connection)).await?;
        let rows = connection.query_rows(&compiled.sql).await?;
        Ok(QueryOutput::new(json!({
            "columns": rows.columns,
            "rows": rows.to_records(),
        })))
    }
}

/// Value of the first `-- key: value` line in `source`
fn pragma<'a>(source: &'a str, prefix: &str) -> Option<&'a str> {
    source
        .lines()
        .find_map(|line| line.trim().strip_prefix(prefix))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Split a document into statements on `;` outside quotes and comments.
///
/// Statements keep their leading comments so `-- name:` lines stay attached.
pub fn split_statements(source: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if in_line_comment {
            in_line_comment = c != '\n';
            continue;
        }
        if in_block_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                current.extend(chars.next());
                in_block_comment = false;
            }
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                // A doubled quote is an escaped quote
                if chars.peek() == Some(&q) {
                    current.extend(chars.next());
                } else {
                    quote = None;
                }
            }
            continue;
        }

        match c {
            '\'' | '"' => quote = Some(c),
            '-' if chars.peek() == Some(&'-') => {
                current.extend(chars.next());
                in_line_comment = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                current.extend(chars.next());
                in_block_comment = true;
            }
            ';' => {
                current.pop();
                push_statement(&mut statements, &mut current);
            }
            _ => {}
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = std::mem::take(current);
    let has_code = statement
        .lines()
        .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"));
    if has_code {
        statements.push(statement.trim().to_string());
    }
}

/// Pick the statement `query` refers to, without its pragma lines
pub fn select_statement(statements: &[String], query: &QuerySpec) -> Result<String> {
    let statement = match query {
        QuerySpec::File { .. } | QuerySpec::Text { .. } => statements.last(),
        QuerySpec::Index { index, .. } => statements.get(*index),
        QuerySpec::Named { name, .. } => statements
            .iter()
            .find(|s| pragma(s, NAME_PRAGMA) == Some(name.as_str())),
    };

    let statement = statement.ok_or_else(|| match query {
        QuerySpec::Named { name, .. } => QuarryError::Query(format!("No query named \"{}\"", name)),
        QuerySpec::Index { index, .. } => QuarryError::Query(format!(
            "No query at index {} ({} found)",
            index,
            statements.len()
        )),
        _ => QuarryError::Query("Document contains no query".to_string()),
    })?;

    Ok(statement
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            !line.starts_with(NAME_PRAGMA) && !line.starts_with(CONNECTION_PRAGMA)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string())
}
