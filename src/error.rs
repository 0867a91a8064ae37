//! Error types for the throttle service.

use thiserror::Error;

/// Main error type for throttle operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// A limit value below its allowed minimum was supplied to a setter.
    #[error("Invalid value for {field}: {value} (must be >= {min})")]
    InvalidLimit {
        field: &'static str,
        value: i64,
        min: i64,
    },

    /// Application configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persisted configuration store errors
    #[error("Store error: {0}")]
    Store(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for throttle operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
