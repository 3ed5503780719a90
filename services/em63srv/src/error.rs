//! Error handling for the EUROMAP63 adapter
//!
//! Only configuration problems are fatal. Everything raised while sessions
//! are running is logged, reported to the alert sink and retried.

use thiserror::Error;

/// EUROMAP63 adapter error type
#[derive(Error, Debug, Clone)]
pub enum Em63Error {
    /// Configuration-related errors (server list, session number, cyclic settings)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// File-exchange transport errors (list, read, write, delete)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Local input/output errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Value conversion and serialization errors
    #[error("Data error: {0}")]
    DataError(String),

    /// Downstream value sink rejected a value
    #[error("Sink error: {0}")]
    SinkError(String),

    /// Invalid request (unknown session, non-writable variable)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal errors (task join, unexpected state)
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the adapter
pub type Result<T> = std::result::Result<T, Em63Error>;

impl Em63Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::SinkError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// True for errors that must stop the adapter from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigError(_))
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<std::io::Error> for Em63Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Em63Error {
    fn from(err: serde_json::Error) -> Self {
        Self::DataError(format!("JSON error: {err}"))
    }
}

impl From<figment::Error> for Em63Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Em63Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::InternalError(format!("Session task failed: {err}"))
    }
}

/// Attach adapter context to foreign errors
pub trait ErrorExt<T> {
    fn transport_error(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn transport_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| Em63Error::TransportError(format!("{msg}: {e}")))
    }
}
