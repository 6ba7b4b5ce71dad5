use std::io;
use thiserror::Error;

/// Error type for the diagnostics orchestration library
#[derive(Error, Debug)]
pub enum DiagError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for the diagnostics library
pub type Result<T> = std::result::Result<T, DiagError>;

impl DiagError {
    /// Create a schema error (unknown or malformed `__class__` payload)
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        DiagError::Schema(msg.into())
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        DiagError::Validation(msg.into())
    }

    pub fn process_not_found<S: Into<String>>(msg: S) -> Self {
        DiagError::ProcessNotFound(msg.into())
    }

    pub fn lock<S: Into<String>>(msg: S) -> Self {
        DiagError::Lock(msg.into())
    }

    pub fn archive<S: Into<String>>(msg: S) -> Self {
        DiagError::Archive(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DiagError::Other(msg.into())
    }
}
