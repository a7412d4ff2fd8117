//! Error Handling Module
//!
//! Defines the error type for the fundus data module.
//! Uses thiserror for ergonomic error definitions.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which dataset partition an operation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "Train"),
            Split::Validation => write!(f, "Valid"),
            Split::Test => write!(f, "Test"),
        }
    }
}

/// Main error type for fundus data module operations
#[derive(Error, Debug)]
pub enum FundusError {
    /// A dataset handle was requested before setup created it
    #[error("{0} dataset is not created yet.")]
    NotSetUp(Split),

    /// Requested validation size cannot be carved out of the training set
    #[error("Invalid split: validation size {requested} exceeds training set length {available}")]
    InvalidSplit { requested: usize, available: usize },

    /// Error loading or processing an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoadError(PathBuf, String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for FundusError {
    fn from(err: serde_json::Error) -> Self {
        FundusError::Serialization(err.to_string())
    }
}

/// Convenience Result type for fundus data module operations
pub type Result<T> = std::result::Result<T, FundusError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| FundusError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| FundusError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| FundusError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| FundusError::InvalidInput(f()))
    }
}
