//! Quarry Connection - Connection factory and backends
//!
//! This crate resolves named connection configurations to live connections,
//! caches them per working directory and fetches credentials through a
//! [`SecretSource`].

mod backend;
mod config;
mod connection;
mod factory;
mod secrets;

#[cfg(feature = "duckdb")]
mod duckdb_backend;
#[cfg(feature = "postgres")]
mod postgres_backend;

#[cfg(feature = "duckdb")]
pub use duckdb_backend::{DuckDbBackend, DuckDbConnection};
#[cfg(feature = "postgres")]
pub use postgres_backend::{PostgresBackend, PostgresConnection};

pub use backend::{BackendContext, BackendRegistry, ConnectionBackend};
pub use config::{ConnectionConfig, ConnectionOptions};
pub use connection::{Connection, QueryRows};
pub use factory::ConnectionFactory;
pub use secrets::{SecretSource, StaticSecrets, TransportSecrets};
