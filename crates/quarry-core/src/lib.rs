//! Quarry Core - Shared data model for staged query runs
//!
//! This crate provides the types every other Quarry crate agrees on:
//!
//! - `PanelId` - Stable identity of one logical output location
//! - `QuerySpec` / `RunRequest` - What the editor asks the worker to run
//! - `QueryStatus` - The staged progress payload the worker emits
//! - `PanelMessage` / `PanelRequest` - Messages to and from a result panel
//! - `QuarryError` - The error taxonomy shared by all crates

mod error;
mod messages;
mod protocol;
mod types;

pub use error::*;
pub use messages::*;
pub use protocol::*;
pub use types::*;
