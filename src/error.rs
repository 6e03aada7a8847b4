//! Error types for fiberscope's own operations.
//!
//! Failures of user computations travel as [`Cause`](crate::types::Cause)
//! values inside fiber exits. The [`Error`] type here covers everything
//! else: registry lookups, runtime construction and configuration.
//!
//! # Error Categories
//!
//! - **Lookup**: a key is missing from a [`FiberMap`](crate::fiber_map::FiberMap)
//! - **Lifecycle**: operating on something that has already shut down
//! - **Configuration**: invalid builder, environment or file settings
//! - **Internal**: runtime bugs and invalid states

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No entry exists for the requested key.
    NotFound,
    /// The target was already closed.
    Closed,
    /// A configuration value was rejected.
    InvalidConfig,
    /// A worker or timer thread could not be spawned.
    ThreadSpawn,
    /// Internal runtime error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns true if retrying the same operation could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound | Self::ThreadSpawn)
    }
}

/// The main error type for fiberscope operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this is a missing-key error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Creates a not-found error describing the missing key.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound).with_message(what)
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Errors raised while assembling a runtime configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// Expected type description.
        expected: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A builder setting was out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Setting name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse TOML config: {0}")]
    Parse(String),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        let message = e.to_string();
        Self::new(ErrorKind::InvalidConfig)
            .with_message(message)
            .with_source(e)
    }
}

/// A specialized Result type for fiberscope operations.
pub type Result<T> = core::result::Result<T, Error>;
