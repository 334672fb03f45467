//! Error types for the format library.

use thiserror::Error;

/// Result type alias using the format library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for format library operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Format not found
    #[error("Format '{0}' not found")]
    FormatNotFound(String),

    /// Tag not found
    #[error("Tag '{0}' not found")]
    TagNotFound(String),

    /// Foreign key or uniqueness violation
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed catalog content (XML, archive, dates)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl Error {
    /// True for errors caused by the data itself rather than the environment.
    ///
    /// Data errors abort the current operation only; the process keeps running.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::FormatNotFound(_)
                | Error::TagNotFound(_)
                | Error::Constraint(_)
                | Error::InvalidInput(_)
                | Error::Parse(_)
        )
    }
}
