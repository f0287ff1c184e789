//! Error types for the tether engine.

use thiserror::Error;

/// All possible errors from the tether engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("owner scope is required")]
    MissingOwnerScope,

    #[error("owner scope must not contain '_': {0}")]
    InvalidOwnerScope(String),

    #[error("unknown merge strategy: {0}")]
    InvalidStrategy(String),

    // Persistence errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
