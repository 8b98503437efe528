//! Result panel that renders into the terminal
//!
//! Results, SQL and schemas go to stdout; stage changes and errors go to
//! stderr so the output can be piped.

use async_trait::async_trait;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use quarry_core::{PanelId, PanelMessage, PanelRequest, Result};
use quarry_panel::{Panel, PanelEvent, PanelEvents, PanelHost};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

pub struct TerminalPanel {
    id: PanelId,
    failed: Arc<AtomicBool>,
    disposed: AtomicBool,
}

impl Panel for TerminalPanel {
    fn id(&self) -> &PanelId {
        &self.id
    }

    fn post_message(&self, message: PanelMessage) {
        match message {
            PanelMessage::Compiling => eprintln!("Compiling…"),
            PanelMessage::Compiled { sql, show_sql_only } => {
                if show_sql_only {
                    println!("{}", sql);
                } else {
                    tracing::debug!(sql = %sql, "compiled");
                }
            }
            PanelMessage::EstimatedCost {
                query_cost_bytes,
                schema,
            } => {
                match query_cost_bytes {
                    Some(bytes) => println!("Estimated cost: {} bytes scanned", bytes),
                    None => println!("Estimated cost: unknown for this connection"),
                }
                print_schema(&schema);
            }
            PanelMessage::Schema { schema } => print_schema(&schema),
            PanelMessage::Running => eprintln!("Running…"),
            PanelMessage::Done {
                name,
                result,
                stats,
                profiling_url,
                ..
            } => {
                println!("{}", render_result(&result));
                eprintln!(
                    "{}: compiled in {:.3}s, ran in {:.3}s",
                    name, stats.compile_time, stats.run_time
                );
                if let Some(url) = profiling_url {
                    eprintln!("Profile: {}", url);
                }
            }
            PanelMessage::Error { error } => {
                self.failed.store(true, Ordering::SeqCst);
                eprintln!("error: {}", error);
            }
        }
    }

    fn reveal(&self) {}

    fn set_title(&self, title: &str) {
        tracing::trace!(panel_id = %self.id, title = %title, "panel title");
    }

    fn is_visible(&self) -> bool {
        true
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Creates [`TerminalPanel`]s; a terminal is ready as soon as it exists
#[derive(Default)]
pub struct TerminalPanelHost {
    failed: Arc<AtomicBool>,
}

impl TerminalPanelHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any panel showed an error
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PanelHost for TerminalPanelHost {
    async fn create_panel(&self, id: &PanelId, _title: &str) -> Result<(Arc<dyn Panel>, PanelEvents)> {
        let panel = Arc::new(TerminalPanel {
            id: id.clone(),
            failed: self.failed.clone(),
            disposed: AtomicBool::new(false),
        });
        let (events, receiver) = mpsc::unbounded_channel();
        let _ = events.send(PanelEvent::Message(PanelRequest::Ready));
        Ok((panel, receiver))
    }
}

fn print_schema(schema: &Value) {
    match serde_json::to_string_pretty(schema) {
        Ok(text) => println!("{}", text),
        Err(e) => tracing::warn!(error = %e, "could not print schema"),
    }
}

/// A table for `{columns, rows}` results, pretty JSON for anything else
pub fn render_result(result: &Value) -> String {
    let columns = result.get("columns").and_then(Value::as_array);
    let rows = result.get("rows").and_then(Value::as_array);
    let (Some(columns), Some(rows)) = (columns, rows) else {
        return serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
    };

    let columns: Vec<String> = columns.iter().map(cell_text).collect();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(columns.clone());

    for row in rows {
        table.add_row(
            columns
                .iter()
                .map(|column| row.get(column).map(cell_text).unwrap_or_default())
                .collect::<Vec<_>>(),
        );
    }

    format!("{}\n({} rows)", table, rows.len())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
