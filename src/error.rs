//! Error types for the LTI gateway

use std::io;

use thiserror::Error;

/// Result type alias for the LTI gateway
pub type Result<T> = std::result::Result<T, Error>;

/// LTI gateway errors
///
/// Validation failures (bad signature, replayed nonce, missing launch
/// parameters) are *not* errors; they are denial values returned by the
/// validator and orchestrator. Only configuration and data-layer problems
/// surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data-layer failure (constraint violation, connectivity)
    #[error("Database error: {0}")]
    Database(String),

    /// Required auth state missing at provisioning time
    #[error("Missing auth state: {0}")]
    MissingState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}
