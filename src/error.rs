//! Error handling for turbine-rs
//!
//! This module defines the crate error type and a Result alias used by the
//! channel map, the request builder and the client protocols.
//!
//! Errors fall in three families:
//! - usage errors (bad arguments, bad state, inconsistent flushes)
//! - connectivity errors, which keep the underlying cause as `source`
//! - type errors, raised by the typed accessors of a channel map

use thiserror::Error;

/// Boxed cause carried by connectivity errors.
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for turbine-rs operations
#[derive(Error, Debug)]
pub enum TurbineError {
    /// Channel index outside the map
    #[error("Channel index {index} out of range (map has {len} channels)")]
    IndexOutOfRange { index: usize, len: usize },

    /// Typed accessor called on a channel holding another type
    #[error("Type mismatch on channel {index}: expected {expected}, found {actual}")]
    TypeMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    /// Raw buffer length is not a multiple of the element size
    #[error("Data length {len} is not a multiple of the element size {element_size}")]
    InvalidSize { len: usize, element_size: usize },

    /// Request mixes channels carrying data with channels that carry none
    #[error("Illegal to mix channels with data and channels without data in a request")]
    IllegalMixedChannels,

    /// Request builder produced nothing to ask for
    #[error("Cannot make empty request")]
    EmptyRequest,

    /// Source flushed a channel set different from the first flush
    #[error("Channel sets must remain consistent for every Flush: {0}")]
    InconsistentFlush(String),

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation not supported by this kind of client
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Client has no open connection
    #[error("Not connected to a server")]
    NotConnected,

    /// Failure reported by the server session, with its cause
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TurbineError>,
    },
}

impl TurbineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TurbineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Wrap a lower level failure as a connection error
    pub fn connection<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TurbineError::Connection {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Connection error without an underlying cause
    pub fn disconnected(message: impl Into<String>) -> Self {
        TurbineError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// True for errors caused by caller misuse rather than the server.
    pub fn is_usage(&self) -> bool {
        match self {
            TurbineError::InvalidArgument(_)
            | TurbineError::InvalidState(_)
            | TurbineError::InconsistentFlush(_)
            | TurbineError::EmptyRequest
            | TurbineError::IllegalMixedChannels
            | TurbineError::IndexOutOfRange { .. }
            | TurbineError::InvalidSize { .. }
            | TurbineError::Unsupported(_) => true,
            TurbineError::WithContext { source, .. } => source.is_usage(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TurbineError {
    fn from(err: serde_json::Error) -> Self {
        TurbineError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for TurbineError {
    fn from(err: toml::de::Error) -> Self {
        TurbineError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for TurbineError {
    fn from(err: toml::ser::Error) -> Self {
        TurbineError::Serialization(err.to_string())
    }
}

/// Result type alias for turbine-rs operations
pub type Result<T> = std::result::Result<T, TurbineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = TurbineError::InvalidArgument("bad reference".to_string());
        assert_eq!(err.to_string(), "Invalid argument: bad reference");
        assert_eq!(
            TurbineError::EmptyRequest.to_string(),
            "Cannot make empty request"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = TurbineError::EmptyRequest;
        let with_ctx = err.with_context("Sink request");
        assert!(with_ctx.to_string().contains("Sink request"));
        assert!(with_ctx.is_usage());
    }

    #[test]
    fn test_connection_error_keeps_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = TurbineError::connection("fetch failed", io);
        assert!(!err.is_usage());
        let cause = err.source().expect("cause preserved");
        assert!(cause.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = TurbineError::TypeMismatch {
            index: 2,
            expected: "float64".into(),
            actual: "int32".into(),
        };
        let text = err.to_string();
        assert!(text.contains("channel 2"));
        assert!(text.contains("float64"));
        assert!(text.contains("int32"));
    }
}
