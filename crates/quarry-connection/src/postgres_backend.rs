//! PostgreSQL backend

use async_trait::async_trait;
use quarry_core::{QuarryError, Result};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

use crate::{BackendContext, Connection, ConnectionBackend, ConnectionConfig, QueryRows};

const DEFAULT_PORT: u16 = 5432;

/// Backend for PostgreSQL servers.
///
/// The password comes from the `password` parameter when present, otherwise
/// from the secret `connections.<name>.password`.
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn password_key(connection_name: &str) -> String {
        format!("connections.{}.password", connection_name)
    }
}

impl Default for PostgresBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionBackend for PostgresBackend {
    fn name(&self) -> &str {
        "postgres"
    }

    #[tracing::instrument(skip(self, config, context), fields(connection = %config.name))]
    async fn connect(
        &self,
        config: &ConnectionConfig,
        context: &BackendContext,
    ) -> Result<Arc<dyn Connection>> {
        let host = config.get_param("host").unwrap_or("localhost");
        let port = match config.get_param("port") {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| QuarryError::Configuration(format!("Invalid port: {}", port)))?,
            None => DEFAULT_PORT,
        };
        let database = config.get_param("database").unwrap_or("postgres");
        let user = config.get_param("user").or_else(|| config.get_param("username"));

        let password = match config.get_param("password") {
            Some(password) => Some(password.to_string()),
            None => {
                let prompt = format!("Password for {}", config.name);
                context
                    .secret(&Self::password_key(&config.name), Some(&prompt))
                    .await?
            }
        };

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(host).port(port).dbname(database);
        if let Some(user) = user {
            pg_config.user(user);
        }
        if let Some(password) = &password {
            pg_config.password(password);
        }

        tracing::info!(host = %host, port = %port, database = %database, "connecting to PostgreSQL");
        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            QuarryError::Connection(format!("Failed to connect to PostgreSQL: {}", e))
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Arc::new(PostgresConnection {
            client: Mutex::new(Some(client)),
            name: config.name.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A PostgreSQL session
pub struct PostgresConnection {
    client: Mutex<Option<Client>>,
    name: String,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for PostgresConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &str {
        "postgres"
    }

    fn dialect(&self) -> &str {
        "postgres"
    }

    async fn test(&self) -> Result<()> {
        self.query_rows("SELECT 1").await.map(|_| ())
    }

    async fn query_rows(&self, sql: &str) -> Result<QueryRows> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| QuarryError::Connection("Connection is closed".to_string()))?;

        let start = std::time::Instant::now();
        let messages = client
            .simple_query(sql)
            .await
            .map_err(|e| QuarryError::Query(e.to_string()))?;

        // The simple protocol returns text; the last statement's rows win
        let mut result = QueryRows::default();
        let mut current = QueryRows::default();
        for message in messages {
            match message {
                SimpleQueryMessage::Row(row) => {
                    if current.columns.is_empty() {
                        current.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    let values = (0..row.len())
                        .map(|i| row.get(i).map_or(Value::Null, |v| Value::String(v.to_string())))
                        .collect();
                    current.rows.push(values);
                }
                SimpleQueryMessage::CommandComplete(_) => {
                    result = std::mem::take(&mut current);
                }
                _ => {}
            }
        }

        tracing::debug!(
            row_count = result.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "query completed"
        );
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the client ends the background connection task
        self.client.lock().await.take();
        tracing::debug!(connection = %self.name, "PostgreSQL connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
