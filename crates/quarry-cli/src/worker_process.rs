//! The query worker as a child process, and the worker side of stdio

use anyhow::{Context, Result};
use async_trait::async_trait;
use quarry_connection::{ConnectionFactory, SecretSource, TransportSecrets};
use quarry_core::{GET_SECRET_METHOD, GetSecretRequest};
use quarry_query::{QueryWorker, SqlEngine};
use quarry_settings::{Settings, WorkerSettings};
use quarry_transport::{Disposable, RpcConnection, TransportExt};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};

const SECRET_ENV_PREFIX: &str = "QUARRY_SECRET_";
pub const SETTINGS_ENV: &str = "QUARRY_SETTINGS";

/// Environment variable holding the secret stored under `key`.
///
/// `connections.warehouse.password` is read from
/// `QUARRY_SECRET_CONNECTIONS_WAREHOUSE_PASSWORD`.
pub fn secret_env_var(key: &str) -> String {
    let suffix: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{}{}", SECRET_ENV_PREFIX, suffix)
}

/// Secrets from `QUARRY_SECRET_*` environment variables
pub struct EnvSecrets;

#[async_trait]
impl SecretSource for EnvSecrets {
    async fn get_secret(&self, key: &str, prompt_if_missing: Option<&str>) -> quarry_core::Result<Option<String>> {
        let var = secret_env_var(key);
        let secret = std::env::var(&var).ok();
        if secret.is_none()
            && let Some(prompt) = prompt_if_missing
        {
            tracing::warn!(key = %key, env = %var, "{} (set {} to provide it)", prompt, var);
        }
        Ok(secret)
    }
}

/// A running worker and the connection to it
pub struct WorkerProcess {
    pub connection: Arc<RpcConnection>,
    child: Child,
    secret_handler: Disposable,
}

impl WorkerProcess {
    /// Start the configured worker, or this binary's `worker` subcommand.
    ///
    /// `settings_file` is handed down so the worker sees the same connections.
    pub fn spawn(
        settings: &WorkerSettings,
        working_directory: Option<&Path>,
        settings_file: Option<&Path>,
    ) -> Result<Self> {
        let mut command = match &settings.command {
            Some(program) => {
                let mut command = Command::new(program);
                command.args(&settings.args);
                command
            }
            None => {
                let exe = std::env::current_exe().context("Could not locate the quarry executable")?;
                let mut command = Command::new(exe);
                command.arg("worker").args(&settings.args);
                command
            }
        };
        if let Some(dir) = working_directory {
            command.current_dir(dir);
        }
        if let Some(file) = settings_file {
            let file = std::path::absolute(file).context("Invalid settings file path")?;
            command.env(SETTINGS_ENV, file);
        }
        command
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = command.spawn().context("Failed to start the query worker")?;
        let stdin = child.stdin.take().context("Worker stdin was not captured")?;
        let stdout = child.stdout.take().context("Worker stdout was not captured")?;
        tracing::debug!(pid = ?child.id(), "query worker started");

        let connection = RpcConnection::new(stdout, stdin);
        let secrets = connection.handle_request(
            GET_SECRET_METHOD,
            |request: GetSecretRequest, _cancel| async move {
                EnvSecrets
                    .get_secret(&request.key, request.prompt_if_missing.as_deref())
                    .await
            },
        );

        Ok(Self {
            connection,
            child,
            secret_handler: secrets,
        })
    }

    /// Close the connection and wait for the worker to exit
    pub async fn shutdown(mut self) -> Result<()> {
        self.secret_handler.dispose();
        self.connection.close();
        // The worker exits once its stdin closes
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), self.child.wait()).await;
        match status {
            Ok(status) => {
                let status = status.context("Failed to wait for the query worker")?;
                tracing::debug!(%status, "query worker exited");
            }
            Err(_) => {
                tracing::warn!("query worker did not exit, killing it");
                self.child.kill().await.context("Failed to kill the query worker")?;
            }
        }
        Ok(())
    }
}

/// Serve `run` requests over this process's stdin and stdout until the
/// editor goes away
pub async fn serve_stdio(settings: Settings) -> Result<()> {
    let connection = RpcConnection::new(tokio::io::stdin(), tokio::io::stdout());

    let secrets = Arc::new(TransportSecrets::new(connection.clone()));
    let factory = Arc::new(ConnectionFactory::new().with_secrets(secrets));
    let connections = factory.add_defaults(settings.connections.clone());
    let options = settings.connection_options(std::env::current_dir().ok());
    tracing::info!(connections = connections.len(), "query worker ready");

    let engine = Arc::new(SqlEngine::new(factory.clone(), connections, options));
    let worker = QueryWorker::new(engine, connection.clone());
    let serving = worker.serve();

    connection.closed().await;
    serving.dispose();
    factory.reset().await;
    tracing::info!("query worker stopped");
    Ok(())
}
