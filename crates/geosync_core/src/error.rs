//! Error types for geosync core.

use crate::types::ResourceId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in geosync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A state machine operation was called on a record in the wrong state.
    ///
    /// This is a contract violation (a race or a caller bug), never an
    /// expected retry-driven outcome.
    #[error("invalid transition for {replicator} resource {resource_id}: cannot {operation} from {from}")]
    InvalidTransition {
        /// Replicator class owning the record.
        replicator: String,
        /// Resource the record tracks.
        resource_id: ResourceId,
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the record was in.
        from: String,
    },

    /// The caller's claim was taken over by a later claim.
    ///
    /// Reported instead of completing somebody else's attempt; the caller
    /// should drop its result like a claim conflict.
    #[error("{operation} on {replicator} resource {resource_id}: claim was superseded")]
    ClaimSuperseded {
        /// Replicator class owning the record.
        replicator: String,
        /// Resource the record tracks.
        resource_id: ResourceId,
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// No registry record exists for the resource.
    #[error("no {replicator} registry record for resource {resource_id}")]
    RecordNotFound {
        /// Replicator class searched.
        replicator: String,
        /// Resource that was not found.
        resource_id: ResourceId,
    },

    /// The replicator class is not registered.
    #[error("unknown replicator class: {name}")]
    UnknownReplicator {
        /// Name that was looked up.
        name: String,
    },

    /// A replicator class with the same name is already registered.
    #[error("replicator class already registered: {name}")]
    DuplicateReplicator {
        /// Name of the duplicate class.
        name: String,
    },

    /// The primary checksum could not be obtained.
    #[error("checksum provider error: {0}")]
    ChecksumProvider(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The journal is corrupted or has an unsupported format.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A journal frame failed its CRC check.
    #[error("journal checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored CRC.
        expected: u32,
        /// Computed CRC.
        actual: u32,
    },

    /// Another process or handle holds the store directory.
    #[error("registry store locked: another process has {} open", .path.display())]
    StoreLocked {
        /// The locked directory.
        path: PathBuf,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoreError {
    /// Creates an invalid transition error.
    pub fn invalid_transition(
        replicator: impl Into<String>,
        resource_id: ResourceId,
        operation: &'static str,
        from: impl std::fmt::Debug,
    ) -> Self {
        Self::InvalidTransition {
            replicator: replicator.into(),
            resource_id,
            operation,
            from: format!("{from:?}"),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Returns true if this error signals a state-machine contract violation.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    /// Returns true if a later claim took the record over.
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::ClaimSuperseded { .. })
    }
}
