//! Primary-site events applied to the registry.
//!
//! Events arrive as JSON lines:
//!
//! ```text
//! {"event":"created","replicator":"upload","resource_id":7}
//! {"event":"checksum_succeeded","replicator":"upload","resource_id":7}
//! ```
//!
//! Events for classes with replication disabled are ignored.

use crate::error::{EngineError, EngineResult};
use geosync_core::{
    Clock, GeoConfig, RegistryStore, ReplicableRegistry, ResourceId, SyncState, SyncStateMachine,
    VerificationStateMachine,
};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::Arc;

/// Kind of primary-site event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A resource was created on the primary.
    Created,
    /// A resource's content changed on the primary.
    Updated,
    /// A resource was deleted on the primary.
    Deleted,
    /// The primary finished checksumming a resource.
    ChecksumSucceeded,
}

/// A single event from the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoEvent {
    /// What happened.
    #[serde(rename = "event")]
    pub kind: EventKind,
    /// Replicator class of the resource.
    pub replicator: String,
    /// The resource.
    pub resource_id: ResourceId,
}

impl GeoEvent {
    /// Creates an event.
    pub fn new(kind: EventKind, replicator: impl Into<String>, resource_id: ResourceId) -> Self {
        Self {
            kind,
            replicator: replicator.into(),
            resource_id,
        }
    }

    /// Creates a `created` event.
    pub fn created(replicator: impl Into<String>, resource_id: ResourceId) -> Self {
        Self::new(EventKind::Created, replicator, resource_id)
    }

    /// Creates an `updated` event.
    pub fn updated(replicator: impl Into<String>, resource_id: ResourceId) -> Self {
        Self::new(EventKind::Updated, replicator, resource_id)
    }

    /// Creates a `deleted` event.
    pub fn deleted(replicator: impl Into<String>, resource_id: ResourceId) -> Self {
        Self::new(EventKind::Deleted, replicator, resource_id)
    }

    /// Creates a `checksum_succeeded` event.
    pub fn checksum_succeeded(replicator: impl Into<String>, resource_id: ResourceId) -> Self {
        Self::new(EventKind::ChecksumSucceeded, replicator, resource_id)
    }
}

/// What applying an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A new pending record was created.
    Created,
    /// The record was queued for another sync.
    ResyncQueued,
    /// The record was removed.
    Removed,
    /// The record was queued for another verification.
    VerificationQueued,
    /// Nothing changed.
    Skipped,
}

/// Outcome counts of a batch of events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventReport {
    /// Records created.
    pub created: usize,
    /// Records queued for resync.
    pub resynced: usize,
    /// Records removed.
    pub removed: usize,
    /// Records queued for verification.
    pub verification_queued: usize,
    /// Events that changed nothing.
    pub skipped: usize,
}

impl EventReport {
    fn count(&mut self, outcome: EventOutcome) {
        match outcome {
            EventOutcome::Created => self.created += 1,
            EventOutcome::ResyncQueued => self.resynced += 1,
            EventOutcome::Removed => self.removed += 1,
            EventOutcome::VerificationQueued => self.verification_queued += 1,
            EventOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Applies primary events to the registry.
pub struct EventConsumer {
    registry: Arc<ReplicableRegistry>,
    store: Arc<RegistryStore>,
    clock: Arc<dyn Clock>,
    config: GeoConfig,
}

impl EventConsumer {
    /// Creates a consumer.
    pub fn new(
        registry: Arc<ReplicableRegistry>,
        store: Arc<RegistryStore>,
        clock: Arc<dyn Clock>,
        config: GeoConfig,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
            config,
        }
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Fails for unknown replicator classes and registry errors.
    pub fn apply(&self, event: &GeoEvent) -> EngineResult<EventOutcome> {
        let class = self.registry.get(&event.replicator)?;
        if !class.is_enabled() {
            return Ok(EventOutcome::Skipped);
        }
        let table = self.store.table(&event.replicator);
        let id = event.resource_id;

        let outcome = match event.kind {
            EventKind::Created | EventKind::Updated => match table.get(id) {
                None => {
                    table.ensure(id)?;
                    EventOutcome::Created
                }
                Some(record) if record.state() == SyncState::Started => {
                    // The running sync may have read the old content; a
                    // later update event or reverification catches it.
                    tracing::debug!(
                        replicator = %event.replicator,
                        resource_id = %id,
                        "resync skipped, sync in progress"
                    );
                    EventOutcome::Skipped
                }
                Some(record) => {
                    let machine = SyncStateMachine::new(
                        table.clone(),
                        class,
                        self.clock.clone(),
                        self.config.clone(),
                    );
                    machine.mark_for_resync(&record)?;
                    EventOutcome::ResyncQueued
                }
            },
            EventKind::Deleted => match table.remove(id)? {
                Some(_) => EventOutcome::Removed,
                None => EventOutcome::Skipped,
            },
            EventKind::ChecksumSucceeded => match table.get(id) {
                Some(record) => {
                    let machine = VerificationStateMachine::new(
                        table.clone(),
                        class,
                        self.clock.clone(),
                        self.config.clone(),
                    );
                    match machine.mark_verification_pending(&record)? {
                        Some(_) => EventOutcome::VerificationQueued,
                        None => EventOutcome::Skipped,
                    }
                }
                None => EventOutcome::Skipped,
            },
        };

        tracing::debug!(
            replicator = %event.replicator,
            resource_id = %id,
            kind = ?event.kind,
            outcome = ?outcome,
            "event applied"
        );
        Ok(outcome)
    }

    /// Applies every event of a JSON lines stream, in order.
    ///
    /// Blank lines are ignored. Stops at the first line that fails to parse
    /// or apply; earlier events stay applied.
    pub fn apply_json_lines(&self, reader: impl BufRead) -> EngineResult<EventReport> {
        let mut report = EventReport::default();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: GeoEvent = serde_json::from_str(&line)
                .map_err(|e| EngineError::InvalidEvent(format!("line {}: {e}", index + 1)))?;
            report.count(self.apply(&event)?);
        }

        tracing::info!(
            created = report.created,
            resynced = report.resynced,
            removed = report.removed,
            verification_queued = report.verification_queued,
            skipped = report.skipped,
            "events applied"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("registry", &self.registry)
            .finish()
    }
}
