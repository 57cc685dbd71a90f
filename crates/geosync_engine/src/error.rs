//! Error types for the replication engine.

use geosync_core::{CoreError, ResourceId};
use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while replicating or verifying resources.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Registry or state machine error.
    #[error("registry error: {0}")]
    Core(#[from] CoreError),

    /// Transferring a resource from the primary failed.
    #[error("transfer error: {message}")]
    Transfer {
        /// Error message.
        message: String,
        /// Whether the transfer can be retried.
        retryable: bool,
    },

    /// The resource does not exist where it was expected.
    #[error("{replicator} resource {resource_id} not found")]
    ResourceMissing {
        /// Replicator class.
        replicator: String,
        /// Missing resource.
        resource_id: ResourceId,
    },

    /// Computing a checksum failed.
    #[error("checksum error: {0}")]
    Checksum(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An event could not be decoded.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A worker thread panicked.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Creates a retryable transfer error.
    pub fn transfer_retryable(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transfer error.
    pub fn transfer_fatal(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later attempt may succeed.
    ///
    /// Non-retryable errors are still recorded on the record and retried on
    /// the backoff schedule; this only decides the log level.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transfer { retryable, .. } => *retryable,
            EngineError::Io(_) => true,
            EngineError::ResourceMissing { .. } => true,
            EngineError::Checksum(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(EngineError::transfer_retryable("connection reset").is_retryable());
        assert!(!EngineError::transfer_fatal("forbidden").is_retryable());
        assert!(EngineError::Io(io::Error::new(io::ErrorKind::Other, "disk")).is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(!EngineError::Core(CoreError::InvalidConfig("x".into())).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = EngineError::ResourceMissing {
            replicator: "upload".into(),
            resource_id: ResourceId::new(4),
        };
        assert_eq!(err.to_string(), "upload resource 4 not found");
    }
}
