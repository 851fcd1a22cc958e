//! Error taxonomy
//!
//! Only configuration errors and `clear` failures reach callers. Backend and
//! validation failures are absorbed by the store with a logged warning.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed or unreadable configuration. Surfaced at startup; the tool does not run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Record failed the schema check
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("state is not a JSON object")]
    NotAnObject,

    #[error("missing properties: {}", .0.join(", "))]
    MissingProperties(Vec<String>),

    #[error("invalid property types: {}", .0.join(", "))]
    InvalidTypes(Vec<String>),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Failure inside a storage backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("connection is closed")]
    Closed,

    #[error("schema version changed on disk (found {found}, expected {expected})")]
    VersionChange { found: u32, expected: u32 },

    #[error("quota exceeded: {size} bytes (max {max})")]
    QuotaExceeded { size: usize, max: usize },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    /// Errors after which the connection must be re-opened
    pub fn invalidates_connection(&self) -> bool {
        matches!(self, BackendError::Closed | BackendError::VersionChange { .. })
    }
}

/// Errors returned by `PersistentStore`
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("primary backend initialization failed: {0}")]
    Init(#[source] BackendError),

    #[error("primary backend failed: {0}")]
    Primary(#[source] BackendError),

    #[error("both storage backends failed (primary: {primary}; fallback: {fallback})")]
    BothFailed {
        primary: BackendError,
        fallback: BackendError,
    },

    #[error("store has been destroyed")]
    Destroyed,
}
