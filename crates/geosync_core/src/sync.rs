//! Sync lifecycle: `pending → started → synced | failed`.
//!
//! Retries are unlimited; a failed record becomes eligible again once its
//! `retry_at` elapses.

use crate::clock::{duration_millis, Clock};
use crate::config::GeoConfig;
use crate::error::{CoreError, CoreResult};
use crate::record::{RegistryRecord, SyncState, VerificationState};
use crate::replicable::Replicable;
use crate::store::{RegistryTable, Write};
use crate::types::{truncate_message, ResourceId, Timestamp};
use std::sync::Arc;

/// Result of trying to claim a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller owns the claim; the record is the stored state after it.
    Claimed(RegistryRecord),
    /// Someone else changed or claimed the record first.
    Conflict,
}

impl ClaimOutcome {
    /// Returns true if the claim was taken.
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }

    /// Returns the claimed record, if any.
    pub fn into_record(self) -> Option<RegistryRecord> {
        match self {
            Self::Claimed(record) => Some(record),
            Self::Conflict => None,
        }
    }
}

/// Drives the sync state of one replicator class's records.
pub struct SyncStateMachine {
    table: Arc<RegistryTable>,
    replicator: Arc<dyn Replicable>,
    clock: Arc<dyn Clock>,
    config: GeoConfig,
}

impl SyncStateMachine {
    /// Creates a state machine over `table`.
    pub fn new(
        table: Arc<RegistryTable>,
        replicator: Arc<dyn Replicable>,
        clock: Arc<dyn Clock>,
        config: GeoConfig,
    ) -> Self {
        Self {
            table,
            replicator,
            clock,
            config,
        }
    }

    /// Returns the table this machine writes to.
    pub fn table(&self) -> &Arc<RegistryTable> {
        &self.table
    }

    /// Returns the replicator class.
    pub fn replicator(&self) -> &Arc<dyn Replicable> {
        &self.replicator
    }

    /// Time before which a `started` claim counts as stalled.
    pub fn stall_cutoff(&self) -> Timestamp {
        self.clock
            .now()
            .saturating_sub(duration_millis(self.config.sync_stall_threshold))
    }

    /// Claims `record` for a sync attempt.
    ///
    /// The claim succeeds only if the stored record still has the
    /// `lock_version` the caller read, and is `pending`, `failed`, `synced`
    /// or holds a stalled `started` claim. Re-claiming a synced record sends
    /// a verified or in-flight verification back to `pending`.
    pub fn start_sync(&self, record: &RegistryRecord) -> CoreResult<ClaimOutcome> {
        let now = self.clock.now();
        let cutoff = self.stall_cutoff();
        let expected_version = record.lock_version;

        let claimed = self.table.mutate(record.resource_id, |stored| {
            if stored.lock_version != expected_version {
                return Ok(Write::Skip);
            }
            if stored.state == SyncState::Started && !stored.sync_claim_stalled(cutoff) {
                return Ok(Write::Skip);
            }
            // A verified copy is about to be replaced.
            if matches!(
                stored.verification_state,
                VerificationState::Verified | VerificationState::Started
            ) {
                stored.verification_state = VerificationState::Pending;
                stored.verification_started_at = None;
            }
            stored.state = SyncState::Started;
            stored.sync_started_at = Some(now);
            Ok(Write::Commit)
        })?;

        Ok(match claimed {
            Some(record) => {
                tracing::debug!(
                    replicator = self.replicator.name(),
                    resource_id = %record.resource_id,
                    retry_count = record.retry_count,
                    "sync started"
                );
                ClaimOutcome::Claimed(record)
            }
            None => ClaimOutcome::Conflict,
        })
    }

    /// Records a successful sync.
    ///
    /// Resets the retry fields and sends the record back to verification,
    /// or marks it `disabled` if its class does not verify.
    pub fn mark_synced(&self, record: &RegistryRecord) -> CoreResult<RegistryRecord> {
        let now = self.clock.now();
        let verify = self.replicator.verification_enabled();

        let updated = self.table.update(record.resource_id, |stored| {
            self.require_claim(stored, record, "mark_synced")?;

            stored.state = SyncState::Synced;
            stored.last_synced_at = Some(now);
            stored.retry_count = 0;
            stored.retry_at = None;
            stored.last_sync_failure = None;
            stored.sync_started_at = None;

            stored.verification_state = if verify {
                VerificationState::Pending
            } else {
                VerificationState::Disabled
            };
            stored.verification_retry_count = 0;
            stored.verification_retry_at = None;
            stored.verification_started_at = None;
            stored.verification_failure = None;
            stored.clear_checksums();
            Ok(())
        })?;

        tracing::debug!(
            replicator = self.replicator.name(),
            resource_id = %updated.resource_id,
            "sync succeeded"
        );
        Ok(updated)
    }

    /// Records a failed sync and schedules the retry.
    pub fn mark_failed(&self, record: &RegistryRecord, reason: &str) -> CoreResult<RegistryRecord> {
        let now = self.clock.now();

        let updated = self.table.update(record.resource_id, |stored| {
            self.require_claim(stored, record, "mark_failed")?;

            stored.state = SyncState::Failed;
            stored.retry_count = stored.retry_count.saturating_add(1);
            stored.retry_at = Some(self.config.backoff.next_retry_at(now, stored.retry_count));
            stored.last_sync_failure = Some(truncate_message(reason));
            stored.sync_started_at = None;
            Ok(())
        })?;

        tracing::warn!(
            replicator = self.replicator.name(),
            resource_id = %updated.resource_id,
            retry_count = updated.retry_count,
            reason,
            "sync failed"
        );
        Ok(updated)
    }

    /// Queues the record for another sync without waiting for a retry.
    ///
    /// Used when the primary reports new content and to resolve a checksum
    /// mismatch by re-downloading. The verification state returns to
    /// `pending` (unless disabled) since the content is about to change.
    pub fn mark_for_resync(&self, record: &RegistryRecord) -> CoreResult<RegistryRecord> {
        let updated = self.table.update(record.resource_id, |stored| {
            if stored.state == SyncState::Started {
                return Err(self.invalid(stored, "mark_for_resync", stored.state));
            }

            stored.state = SyncState::Pending;
            stored.retry_at = None;
            stored.sync_started_at = None;

            if stored.verification_state != VerificationState::Disabled {
                stored.verification_state = VerificationState::Pending;
            }
            stored.verification_retry_at = None;
            stored.verification_started_at = None;
            Ok(())
        })?;

        tracing::debug!(
            replicator = self.replicator.name(),
            resource_id = %updated.resource_id,
            "resync requested"
        );
        Ok(updated)
    }

    /// Looks up the stored record.
    pub fn fetch(&self, resource_id: ResourceId) -> CoreResult<RegistryRecord> {
        self.table.fetch(resource_id)
    }

    /// The stored record must still carry the caller's claim.
    ///
    /// A claim is identified by its `sync_started_at`; a record re-claimed
    /// after a stall carries a later one.
    fn require_claim(
        &self,
        stored: &RegistryRecord,
        claim: &RegistryRecord,
        operation: &'static str,
    ) -> CoreResult<()> {
        if stored.state == SyncState::Started && stored.sync_started_at == claim.sync_started_at {
            return Ok(());
        }
        if claim.sync_started_at.is_some() && stored.sync_started_at != claim.sync_started_at {
            return Err(CoreError::ClaimSuperseded {
                replicator: self.replicator.name().to_string(),
                resource_id: stored.resource_id,
                operation,
            });
        }
        Err(self.invalid(stored, operation, stored.state))
    }

    fn invalid(&self, stored: &RegistryRecord, operation: &'static str, from: SyncState) -> CoreError {
        CoreError::invalid_transition(self.replicator.name(), stored.resource_id, operation, from)
    }
}

impl std::fmt::Debug for SyncStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateMachine")
            .field("replicator", &self.replicator.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::clock::ManualClock;
    use crate::replicable::{MemoryChecksumProvider, ReplicationStrategy, ReplicatorClass};
    use std::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        class: Arc<ReplicatorClass>,
        machine: SyncStateMachine,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let class = Arc::new(ReplicatorClass::new(
            "upload",
            ReplicationStrategy::Blob,
            Arc::new(MemoryChecksumProvider::new()),
        ));
        let config = GeoConfig::new().backoff(BackoffPolicy::deterministic());
        let machine = SyncStateMachine::new(
            Arc::new(RegistryTable::new("upload")),
            class.clone(),
            clock.clone(),
            config,
        );
        Fixture {
            clock,
            class,
            machine,
        }
    }

    fn ensure(fx: &Fixture, id: u64) -> RegistryRecord {
        fx.machine.table().ensure(ResourceId::new(id)).unwrap()
    }

    #[test]
    fn claim_then_succeed() {
        let fx = fixture();
        let record = ensure(&fx, 1);

        let claimed = fx.machine.start_sync(&record).unwrap().into_record().unwrap();
        assert_eq!(claimed.state(), SyncState::Started);
        assert_eq!(claimed.sync_started_at(), Some(1_000_000));

        let synced = fx.machine.mark_synced(&claimed).unwrap();
        assert_eq!(synced.state(), SyncState::Synced);
        assert_eq!(synced.last_synced_at(), Some(1_000_000));
        assert_eq!(synced.verification_state(), VerificationState::Pending);
        assert!(synced.invariant_violations().is_empty());
    }

    #[test]
    fn stale_version_conflicts() {
        let fx = fixture();
        let record = ensure(&fx, 1);

        assert!(fx.machine.start_sync(&record).unwrap().is_claimed());
        assert_eq!(fx.machine.start_sync(&record).unwrap(), ClaimOutcome::Conflict);
    }

    #[test]
    fn fresh_claim_conflicts_but_stalled_claim_is_retaken() {
        let fx = fixture();
        let claimed = fx
            .machine
            .start_sync(&ensure(&fx, 1))
            .unwrap()
            .into_record()
            .unwrap();

        assert_eq!(fx.machine.start_sync(&claimed).unwrap(), ClaimOutcome::Conflict);

        fx.clock.advance(Duration::from_secs(8 * 60 * 60 + 1));
        let retaken = fx.machine.start_sync(&claimed).unwrap().into_record().unwrap();
        assert!(retaken.lock_version() > claimed.lock_version());
        assert_eq!(retaken.sync_started_at(), Some(fx.clock.now()));
    }

    #[test]
    fn failure_schedules_retry() {
        let fx = fixture();
        let claimed = fx
            .machine
            .start_sync(&ensure(&fx, 1))
            .unwrap()
            .into_record()
            .unwrap();

        let failed = fx.machine.mark_failed(&claimed, "connection reset").unwrap();
        assert_eq!(failed.state(), SyncState::Failed);
        assert_eq!(failed.retry_count(), 1);
        assert_eq!(failed.retry_at(), Some(1_000_000 + 46_000));
        assert_eq!(failed.last_sync_failure(), Some("connection reset"));
        assert!(!failed.sync_due(1_000_000));
        assert!(failed.sync_due(1_046_000));
    }

    #[test]
    fn success_after_failures_resets_retry_fields() {
        let fx = fixture();
        let mut record = ensure(&fx, 1);
        for _ in 0..3 {
            let claimed = fx.machine.start_sync(&record).unwrap().into_record().unwrap();
            record = fx.machine.mark_failed(&claimed, "timeout").unwrap();
        }
        assert_eq!(record.retry_count(), 3);

        let claimed = fx.machine.start_sync(&record).unwrap().into_record().unwrap();
        let synced = fx.machine.mark_synced(&claimed).unwrap();
        assert_eq!(synced.retry_count(), 0);
        assert_eq!(synced.retry_at(), None);
        assert_eq!(synced.last_sync_failure(), None);
    }

    #[test]
    fn mark_synced_twice_is_rejected() {
        let fx = fixture();
        let claimed = fx
            .machine
            .start_sync(&ensure(&fx, 1))
            .unwrap()
            .into_record()
            .unwrap();
        let synced = fx.machine.mark_synced(&claimed).unwrap();

        let err = fx.machine.mark_synced(&synced).unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(fx.machine.fetch(ResourceId::new(1)).unwrap(), synced);
    }

    #[test]
    fn stale_claim_cannot_complete_a_reclaimed_record() {
        let fx = fixture();
        let first = fx
            .machine
            .start_sync(&ensure(&fx, 1))
            .unwrap()
            .into_record()
            .unwrap();

        fx.clock.advance(Duration::from_secs(9 * 60 * 60));
        let second = fx.machine.start_sync(&first).unwrap().into_record().unwrap();

        let err = fx.machine.mark_synced(&first).unwrap_err();
        assert!(err.is_superseded());
        assert!(fx.machine.mark_failed(&first, "late").unwrap_err().is_superseded());
        assert_eq!(fx.machine.fetch(ResourceId::new(1)).unwrap(), second);

        let synced = fx.machine.mark_synced(&second).unwrap();
        assert_eq!(synced.state(), SyncState::Synced);
        assert!(fx.machine.mark_synced(&first).unwrap_err().is_superseded());
    }

    #[test]
    fn mark_failed_requires_claim() {
        let fx = fixture();
        let record = ensure(&fx, 1);
        assert!(fx
            .machine
            .mark_failed(&record, "nope")
            .unwrap_err()
            .is_contract_violation());
    }

    #[test]
    fn verification_disabled_class_marks_record_disabled() {
        let fx = fixture();
        fx.class.set_verification_enabled(false);
        let claimed = fx
            .machine
            .start_sync(&ensure(&fx, 1))
            .unwrap()
            .into_record()
            .unwrap();

        let synced = fx.machine.mark_synced(&claimed).unwrap();
        assert_eq!(synced.verification_state(), VerificationState::Disabled);
    }

    #[test]
    fn resync_resets_to_pending() {
        let fx = fixture();
        let claimed = fx
            .machine
            .start_sync(&ensure(&fx, 1))
            .unwrap()
            .into_record()
            .unwrap();
        let synced = fx.machine.mark_synced(&claimed).unwrap();

        let pending = fx.machine.mark_for_resync(&synced).unwrap();
        assert_eq!(pending.state(), SyncState::Pending);
        assert_eq!(pending.verification_state(), VerificationState::Pending);
        assert!(pending.sync_due(fx.clock.now()));

        let claimed = fx.machine.start_sync(&pending).unwrap().into_record().unwrap();
        assert!(fx
            .machine
            .mark_for_resync(&claimed)
            .unwrap_err()
            .is_contract_violation());
    }

    #[test]
    fn long_failure_message_is_truncated() {
        let fx = fixture();
        let claimed = fx
            .machine
            .start_sync(&ensure(&fx, 1))
            .unwrap()
            .into_record()
            .unwrap();
        let failed = fx.machine.mark_failed(&claimed, &"x".repeat(1_000)).unwrap();
        assert_eq!(failed.last_sync_failure().map(str::len), Some(255));
    }
}
