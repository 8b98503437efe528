//! Quarry Query - Staged query runs
//!
//! Editor side, [`QueryRunner`] sends one `run` request per query, follows the
//! worker's staged progress and forwards it to a result panel. Worker side,
//! [`QueryWorker`] serves `run` requests by driving a [`QueryEngine`].

mod active_run;
mod followup;
mod progress;
mod runner;
mod sql_engine;
mod usage;
mod worker;

pub use followup::{CommandExecutor, NoopCommands};
pub use progress::{ProgressReport, ProgressSink};
pub use runner::{QueryRunner, RunOptions};
pub use sql_engine::{SqlEngine, select_statement, split_statements};
pub use usage::QueryUsage;
pub use worker::{CompiledQuery, QueryEngine, QueryOutput, QueryWorker};
