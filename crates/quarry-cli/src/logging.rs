//! Tracing setup for the quarry binary
//!
//! Console output goes to stderr: stdout carries query results, and in worker
//! mode the JSON-RPC stream. Every process also appends JSON lines to a
//! daily-rolled file under the log directory.

use std::path::PathBuf;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const QUIET_FILTER: &str = "warn,quarry_cli=info,quarry_query=info,quarry_connection=info";
const VERBOSE_FILTER: &str =
    "info,quarry_cli=debug,quarry_query=debug,quarry_transport=debug,quarry_panel=debug,quarry_connection=debug";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    /// Rolled daily, so the date is appended
    pub file_name: String,
    /// Source locations and span open/close events in every line
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(log_dir: PathBuf, verbose: bool) -> Self {
        Self {
            log_dir,
            file_name: "quarry.log".to_string(),
            verbose,
        }
    }

    /// Keep worker output apart from the editor's
    pub fn for_worker(mut self) -> Self {
        self.file_name = "quarry-worker.log".to_string();
        self
    }

    /// Directives used when RUST_LOG is unset
    pub fn default_filter(&self) -> &'static str {
        if self.verbose { VERBOSE_FILTER } else { QUIET_FILTER }
    }
}

/// Install the global subscriber. Only the first call in a process may succeed.
pub fn init(config: LoggingConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.log_dir)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter()));
    // NEW rather than ENTER: awaited futures re-enter their span on every poll
    let spans = if config.verbose {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.verbose)
        .with_line_number(config.verbose)
        .with_span_events(spans.clone())
        .compact()
        .with_filter(filter.clone());

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&config.log_dir, &config.file_name));
    // Flushing on exit is best effort; the subscriber is never torn down
    std::mem::forget(guard);
    let file = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_thread_ids(true)
        .with_span_events(spans)
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter);

    tracing_subscriber::registry().with(console).with(file).try_init()?;

    tracing::debug!(log_dir = %config.log_dir.display(), file = %config.file_name, "logging initialized");
    Ok(())
}

/// Used when the settings directory cannot be determined
pub fn fallback_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quarry")
        .join("logs")
}
