//! Error types for Quarry

use thiserror::Error;

/// Core error type for Quarry operations
#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Unknown connection backend: {0}")]
    UnknownBackend(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The worker on the other end of the transport went away.
    #[error("Worker connection closed: {0}")]
    WorkerCrashed(String),

    /// The remote side answered a request with an error response.
    #[error("Remote error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl QuarryError {
    /// True when the error means the worker process is gone rather than that
    /// it answered with a failure.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, QuarryError::Transport(_) | QuarryError::WorkerCrashed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QuarryError::Cancelled)
    }
}

/// Result type alias for Quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;
