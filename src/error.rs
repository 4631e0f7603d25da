//! Error types for StageCache

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the write-behind cache
///
/// Variants carry rendered messages rather than source errors so that a
/// single failure can be handed to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested resource (store path, key) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error reported by the storage engine
    #[error("I/O error: {0}")]
    Io(String),

    /// The storage engine detected corrupted data
    #[error("Storage corruption: {0}")]
    Corruption(String),

    /// A bounded queue is full and the caller asked not to wait
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The cache has been closed
    #[error("Cache is closed")]
    Closed,

    /// A deadline elapsed before the operation completed
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Short, stable label attached to log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Io(_) => "io",
            Error::Corruption(_) => "corruption",
            Error::ResourceExhausted(_) => "resource_exhausted",
            Error::Closed => "closed",
            Error::Timeout(_) => "timeout",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Error::NotFound(e.to_string())
            }
            sled::Error::Io(e) => Error::Io(e.to_string()),
            sled::Error::Corruption { at, .. } => match at {
                Some(ptr) => Error::Corruption(format!("corrupted data at {:?}", ptr)),
                None => Error::Corruption("corrupted data".into()),
            },
            sled::Error::CollectionNotFound(name) => {
                Error::NotFound(String::from_utf8_lossy(&name).into_owned())
            }
            sled::Error::Unsupported(msg) => Error::Internal(msg),
            sled::Error::ReportableBug(msg) => Error::Internal(msg),
            #[allow(unreachable_patterns)]
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(err.to_string()),
            _ => Error::Io(err.to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
