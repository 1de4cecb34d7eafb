//! Error types for the Rategate service.

use thiserror::Error;

/// Main error type for Rategate operations.
#[derive(Error, Debug)]
pub enum RateGateError {
    /// The state store could not be read, written or reached.
    #[error("Store error: {0}")]
    Store(String),

    /// A persisted bucket field could not be parsed as a number.
    #[error("Corrupt state in entry '{entry}': {value:?} is not a valid number")]
    CorruptState {
        /// Store entry that held the value
        entry: String,
        /// The raw stored value
        value: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RateGateError {
    /// Create a new store error.
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error came from the state store rather than from the data in it.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<redis::RedisError> for RateGateError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type alias for Rategate operations.
pub type Result<T> = std::result::Result<T, RateGateError>;
