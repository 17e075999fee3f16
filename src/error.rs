//! Error types for large-object and adapter operations.

use std::fmt;

use thiserror::Error;

/// A failure reported by the client library, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    /// SQLSTATE code, when the server supplied one.
    pub code: Option<String>,
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DriverError {}

/// The main error type for guarded large objects.
#[derive(Debug, Error)]
pub enum LoError {
    /// The handle or its connection is already closed.
    #[error("lobject already closed")]
    Closed,

    /// The connection itself is already closed.
    #[error("connection already closed")]
    ConnectionClosed,

    /// Large objects can only be used inside an explicit transaction.
    #[error("can't use a lobject outside of transactions")]
    TransactionRequired,

    /// The connection committed or rolled back since the handle was opened.
    #[error("lobject isn't valid anymore")]
    StaleHandle,

    /// The client library call failed.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Local file error during import or export.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The value does not implement the requested adapter protocol.
    #[error("can't adapt value: {0}")]
    CannotAdapt(String),

    /// Isolation level outside 0..=2.
    #[error("bad isolation level value: {0}")]
    InvalidIsolationLevel(i32),

    /// Unknown large-object open mode.
    #[error("Invalid mode: '{0}'. Expected: r, w, rw or n")]
    InvalidMode(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LoError {
    /// Whether the same call can succeed once the caller opens a transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionRequired)
    }

    /// Whether the caller must open a fresh handle to continue.
    pub fn requires_reopen(&self) -> bool {
        matches!(self, Self::Closed | Self::ConnectionClosed | Self::StaleHandle)
    }
}

/// Result type alias for large-object operations.
pub type LoResult<T> = Result<T, LoError>;
