//! quarry: run queries through a query worker from the terminal

mod logging;
mod terminal_panel;
mod worker_process;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use quarry_connection::{ConnectionConfig, ConnectionFactory};
use quarry_core::{PanelId, QuerySpec};
use quarry_query::{NoopCommands, ProgressReport, ProgressSink, QueryRunner, RunOptions};
use quarry_settings::Settings;
use quarry_transport::CancellationToken;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::logging::LoggingConfig;
use crate::terminal_panel::TerminalPanelHost;
use crate::worker_process::{EnvSecrets, WorkerProcess};

#[derive(Debug, Parser)]
#[command(name = "quarry", version, about = "Run queries through a query worker")]
struct Cli {
    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Settings file to use instead of the per-user one
    #[arg(long, global = true, env = worker_process::SETTINGS_ENV)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one query and print its result
    Run(RunArgs),
    /// Serve run requests over stdin/stdout
    Worker,
    /// List configured connections, including implicit defaults
    Connections {
        /// Resolve relative database paths against this directory
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },
    /// Connect with a configured connection and run a trivial query
    TestConnection {
        name: String,
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Document containing the query
    #[arg(long, required_unless_present = "text")]
    file: Option<PathBuf>,

    /// Run the statement marked `-- name: <NAME>`
    #[arg(long, conflicts_with_all = ["index", "text"])]
    query: Option<String>,

    /// Run the statement at this position, starting at 0
    #[arg(long, conflicts_with = "text")]
    index: Option<usize>,

    /// Run this source text instead of a file's contents
    #[arg(long)]
    text: Option<String>,

    /// Only print the generated SQL
    #[arg(long)]
    sql_only: bool,

    /// Only print the result schema
    #[arg(long, conflicts_with = "sql_only")]
    schema_only: bool,

    /// Only print the cost estimate
    #[arg(long, conflicts_with_all = ["sql_only", "schema_only"])]
    estimate_only: bool,

    /// Panel identity; runs sharing one replace each other
    #[arg(long, default_value = "cli")]
    panel_id: String,

    /// Worker executable, overriding settings
    #[arg(long)]
    worker: Option<String>,
}

impl RunArgs {
    fn query_spec(&self) -> Result<QuerySpec> {
        let uri = match &self.file {
            Some(file) => {
                let path = std::path::absolute(file)
                    .with_context(|| format!("Invalid query file path {:?}", file))?;
                format!("file://{}", path.display())
            }
            None => "untitled:cli".to_string(),
        };

        Ok(match (&self.text, &self.query, self.index) {
            (Some(text), _, _) => QuerySpec::Text {
                uri,
                text: text.clone(),
            },
            (None, Some(name), _) => QuerySpec::Named {
                uri,
                name: name.clone(),
            },
            (None, None, Some(index)) => QuerySpec::Index { uri, index },
            (None, None, None) => QuerySpec::File { uri },
        })
    }

    fn title(&self) -> String {
        if let Some(name) = &self.query {
            return name.clone();
        }
        self.file
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "query".to_string())
    }
}

/// Stage changes are printed by the panel; progress only goes to the log
struct TerminalProgress;

impl ProgressSink for TerminalProgress {
    fn report(&self, report: ProgressReport) {
        tracing::debug!(increment = report.increment, message = ?report.message, "run progress");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = quarry_settings::log_dir().unwrap_or_else(|_| logging::fallback_log_dir());
    let mut config = LoggingConfig::new(log_dir, cli.verbose || cfg!(debug_assertions));
    if matches!(cli.command, Command::Worker) {
        config = config.for_worker();
    }
    logging::init(config)?;

    let settings = match &cli.settings {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Command::Run(args) => run(args, settings, cli.settings.as_deref()).await,
        Command::Worker => worker_process::serve_stdio(settings).await,
        Command::Connections { working_dir } => list_connections(&settings, working_dir),
        Command::TestConnection { name, working_dir } => {
            test_connection(&settings, &name, working_dir).await
        }
    }
}

async fn run(args: RunArgs, mut settings: Settings, settings_file: Option<&Path>) -> Result<()> {
    let query = args.query_spec()?;
    if let Some(worker) = &args.worker {
        settings.worker.command = Some(worker.clone());
    }
    let working_dir = args
        .file
        .as_deref()
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty());

    let worker = WorkerProcess::spawn(&settings.worker, working_dir, settings_file)?;
    let host = Arc::new(TerminalPanelHost::new());
    let runner = QueryRunner::new(worker.connection.clone(), host.clone(), Arc::new(NoopCommands));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling…");
            on_interrupt.cancel();
        }
    });

    let options = RunOptions {
        show_sql_only: args.sql_only,
        show_schema_only: args.schema_only,
        estimate_cost_only: args.estimate_only,
        default_tab: settings.default_tab.clone(),
        ..RunOptions::with_webview()
    };
    let outcome = runner
        .run_query(
            query,
            PanelId::new(args.panel_id.clone()),
            &args.title(),
            options,
            cancel.clone(),
            Some(Arc::new(TerminalProgress) as Arc<dyn ProgressSink>),
        )
        .await;

    worker.shutdown().await?;
    let result = outcome?;

    if cancel.is_cancelled() {
        bail!("Query cancelled");
    }
    if host.failed() {
        bail!("Query failed");
    }
    if let Some(result) = result {
        tracing::info!(total_time = result.stats.total_time, "query finished");
    }
    Ok(())
}

fn list_connections(settings: &Settings, working_dir: Option<PathBuf>) -> Result<()> {
    let factory = ConnectionFactory::new();
    let configs = factory.add_defaults(settings.connections.clone());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Name", "Backend", "Default", "Source", "Parameters"]);
    for config in &configs {
        table.add_row(vec![
            config.name.clone(),
            config.backend.clone(),
            (if config.is_default { "yes" } else { "" }).to_string(),
            (if config.is_generated { "built-in" } else { "settings" }).to_string(),
            describe_params(config, working_dir.as_deref()),
        ]);
    }
    println!("{}", table);
    Ok(())
}

/// Parameters for display, with passwords hidden and database paths resolved
fn describe_params(config: &ConnectionConfig, working_dir: Option<&Path>) -> String {
    config
        .params
        .iter()
        .map(|(key, value)| match key.as_str() {
            "password" => format!("{}=****", key),
            "database" | "path" if config.backend == "duckdb" => {
                let path = Path::new(value);
                match working_dir {
                    Some(dir) if path.is_relative() && value != ":memory:" => {
                        format!("{}={}", key, dir.join(path).display())
                    }
                    _ => format!("{}={}", key, value),
                }
            }
            _ => format!("{}={}", key, value),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

async fn test_connection(settings: &Settings, name: &str, working_dir: Option<PathBuf>) -> Result<()> {
    let factory = ConnectionFactory::new().with_secrets(Arc::new(EnvSecrets));
    let configs = factory.add_defaults(settings.connections.clone());
    let config = configs
        .iter()
        .find(|c| c.name == name)
        .with_context(|| format!("No connection named \"{}\"", name))?;

    let working_dir = match working_dir {
        Some(dir) => Some(dir),
        None => std::env::current_dir().ok(),
    };
    factory
        .test_connection(config, &settings.connection_options(working_dir))
        .await
        .with_context(|| format!("Connection \"{}\" failed", name))?;

    println!("Connection \"{}\" ({}) is working", config.name, config.backend);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_named_query_from_file() {
        let args = parse(&["quarry", "run", "--file", "/q/flights.sql", "--query", "by_carrier"]);
        assert_eq!(
            args.query_spec().unwrap(),
            QuerySpec::Named {
                uri: "file:///q/flights.sql".into(),
                name: "by_carrier".into(),
            }
        );
        assert_eq!(args.title(), "by_carrier");
    }

    #[test]
    fn test_text_query_needs_no_file() {
        let args = parse(&["quarry", "run", "--text", "SELECT 1", "--sql-only"]);
        assert_eq!(
            args.query_spec().unwrap(),
            QuerySpec::Text {
                uri: "untitled:cli".into(),
                text: "SELECT 1".into(),
            }
        );
        assert!(args.sql_only);
        assert_eq!(args.title(), "query");
    }

    #[test]
    fn test_conflicting_selectors_are_rejected() {
        assert!(Cli::try_parse_from(["quarry", "run", "--file", "a.sql", "--query", "x", "--index", "1"]).is_err());
        assert!(Cli::try_parse_from(["quarry", "run"]).is_err());
        assert!(Cli::try_parse_from(["quarry", "run", "--text", "SELECT 1", "--sql-only", "--schema-only"]).is_err());
    }

    #[test]
    fn test_password_is_hidden() {
        let config = ConnectionConfig::new("warehouse", "postgres")
            .with_param("host", "db")
            .with_param("password", "hunter2");
        assert_eq!(describe_params(&config, None), "host=db, password=****");
    }

    #[test]
    fn test_relative_duckdb_path_is_resolved() {
        let config = ConnectionConfig::new("local", "duckdb").with_param("database", "data/flights.db");
        assert_eq!(
            describe_params(&config, Some(Path::new("/work"))),
            "database=/work/data/flights.db"
        );
    }
}
