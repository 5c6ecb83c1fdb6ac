//! Error types for Sluice.
//!
//! Defines the main error enum used throughout the library.

use thiserror::Error;

/// Main error type for Sluice operations.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// Warehouse connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (syntax errors, timeouts, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Table write errors (table already exists, rejected rows, etc.)
    #[error("Write error: {0}")]
    Write(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential errors (missing key files, unset environment variables, etc.)
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// DataFrame conversion errors (row/column shape mismatches, codec failures).
    #[error("Frame error: {0}")]
    Frame(String),
}

impl SluiceError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a write error with the given message.
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a credentials error with the given message.
    pub fn credentials(msg: impl Into<String>) -> Self {
        Self::Credentials(msg.into())
    }

    /// Creates a frame conversion error with the given message.
    pub fn frame(msg: impl Into<String>) -> Self {
        Self::Frame(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Write(_) => "Write Error",
            Self::Config(_) => "Configuration Error",
            Self::Credentials(_) => "Credentials Error",
            Self::Frame(_) => "Frame Error",
        }
    }
}

impl From<polars::error::PolarsError> for SluiceError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::Frame(err.to_string())
    }
}

/// Result type alias using SluiceError.
pub type Result<T> = std::result::Result<T, SluiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_connection() {
        let err = SluiceError::connection("Cannot connect to localhost:5432");
        assert_eq!(
            err.to_string(),
            "Connection error: Cannot connect to localhost:5432"
        );
        assert_eq!(err.category(), "Connection Error");
    }

    #[test]
    fn test_error_display_query() {
        let err = SluiceError::query("column \"emal\" does not exist");
        assert_eq!(
            err.to_string(),
            "Query error: column \"emal\" does not exist"
        );
        assert_eq!(err.category(), "Query Error");
    }

    #[test]
    fn test_error_display_write() {
        let err = SluiceError::write("table analytics.events already exists");
        assert_eq!(
            err.to_string(),
            "Write error: table analytics.events already exists"
        );
        assert_eq!(err.category(), "Write Error");
    }

    #[test]
    fn test_error_display_credentials() {
        let err = SluiceError::credentials("GOOGLE_APPLICATION_CREDENTIALS not set");
        assert_eq!(
            err.to_string(),
            "Credentials error: GOOGLE_APPLICATION_CREDENTIALS not set"
        );
        assert_eq!(err.category(), "Credentials Error");
    }

    #[test]
    fn test_polars_error_maps_to_frame() {
        let polars_err = polars::error::PolarsError::ComputeError("bad shape".into());
        let err: SluiceError = polars_err.into();
        assert!(matches!(err, SluiceError::Frame(_)));
        assert_eq!(err.category(), "Frame Error");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SluiceError>();
    }
}
