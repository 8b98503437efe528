//! Quarry Transport - Request/response and progress plumbing
//!
//! This crate connects the editor with the long-lived query worker. It offers:
//!
//! - [`Transport`] - typed requests, request handlers, and progress
//!   notifications demultiplexed by token
//! - [`RpcConnection`] - a newline-delimited JSON-RPC implementation over any
//!   async byte stream (child process stdio, sockets, in-memory pipes)
//! - [`ProgressRouter`] - the token to listener table behind `on_progress`
//! - [`Disposable`] - the handle returned by every subscription

mod connection;
mod disposable;
mod message;
mod router;
mod transport;

pub use connection::RpcConnection;
pub use disposable::Disposable;
pub use message::{RpcErrorObject, RpcMessage, error_codes};
pub use router::ProgressRouter;
pub use transport::{ProgressHandler, RequestHandler, Transport, TransportExt};

pub use tokio_util::sync::CancellationToken;
