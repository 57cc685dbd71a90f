//! # Geosync Engine
//!
//! Drives replication and verification for a secondary site on top of
//! [`geosync_core`].
//!
//! This crate provides:
//! - Sync and verification workers that claim batches and record outcomes
//! - A scheduler cycle with per-class worker pools sized by capacity
//! - Reconciliation of registry tables against the primary's listing
//! - Consumption of primary events (created, updated, deleted, checksummed)
//! - Filesystem collaborators with SHA-256 checksums
//!
//! ## Architecture
//!
//! The engine only consumes collaborators through traits: [`Transfer`]
//! copies a resource, [`LocalChecksummer`] digests the local copy and
//! [`ResourceFeed`] lists what exists on the primary. The [`Scheduler`] runs
//! one pool of scoped threads per class and stage; workers do collaborator
//! I/O outside every registry lock.
//!
//! ## Key Invariants
//!
//! - Collaborator failures are recorded on the record, never propagated
//! - Records that change under a worker are skipped, not failed
//! - Pool sizes never exceed the class's capacity share

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod events;
pub mod fs;
mod reconcile;
mod scheduler;
mod stats;
mod transport;
mod worker;

pub use error::{EngineError, EngineResult};
pub use events::{EventConsumer, EventKind, EventOutcome, EventReport, GeoEvent};
pub use reconcile::{ReconcileReport, Reconciler};
pub use scheduler::{ClassReport, CycleReport, Scheduler};
pub use stats::EngineStats;
pub use transport::{
    LocalChecksummer, MockChecksummer, MockResourceFeed, MockTransfer, ResourceFeed, Transfer,
};
pub use worker::{SyncWorker, VerificationWorker, WorkerReport};
