//! # Geosync Core
//!
//! Replication and verification bookkeeping for a secondary site that
//! mirrors resources from a primary.
//!
//! This crate provides:
//! - Registry records, one per (resource, replicator class)
//! - Sync state machine (pending → started → synced | failed)
//! - Verification state machine (pending → started → verified | failed, plus disabled)
//! - Retry backoff with jitter
//! - Capacity allocation across replicator classes
//! - Index-backed batch selection with stalled-claim recovery
//! - Registry tables with an optional CRC-framed journal
//!
//! ## Architecture
//!
//! Each replicator class owns a [`RegistryTable`]. Workers ask a
//! [`BatchSelector`] for eligible records, claim them through a
//! [`SyncStateMachine`] or [`VerificationStateMachine`], do the transfer or
//! checksum work outside any lock, and then record the outcome through the
//! same machine. The [`ReplicableRegistry`] supplies the classes and their
//! runtime toggles; [`allocate`] bounds per-class concurrency.
//!
//! ## Key Invariants
//!
//! - Only the state machines mutate records
//! - At most one claim succeeds per record version
//! - Verification only starts on synced records
//! - A checksum mismatch always carries two differing checksums
//! - Retries are unlimited; backoff delays never decrease

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod batch;
mod capacity;
mod clock;
mod config;
mod error;
mod record;
mod replicable;
mod status;
pub mod store;
mod sync;
mod types;
mod verification;

pub use backoff::BackoffPolicy;
pub use batch::BatchSelector;
pub use capacity::{allocate, LEGACY_VERIFICATION_SCHEDULERS};
pub use clock::{duration_millis, Clock, ManualClock, SystemClock};
pub use config::GeoConfig;
pub use error::{CoreError, CoreResult};
pub use record::{RegistryRecord, SyncState, VerificationState};
pub use replicable::{
    ChecksumProvider, MemoryChecksumProvider, Replicable, ReplicableRegistry, ReplicationStrategy,
    ReplicatorClass, DEFAULT_REPLICATORS,
};
pub use status::ReplicationStatus;
pub use store::{RegistryStore, RegistryTable};
pub use sync::{ClaimOutcome, SyncStateMachine};
pub use types::{truncate_message, Checksum, ResourceId, Timestamp, MAX_FAILURE_MESSAGE_LEN};
pub use verification::{
    VerificationStateMachine, CHECKSUM_MISMATCH_MESSAGE, PRIMARY_CHECKSUM_UNAVAILABLE,
};
