//! Verification lifecycle: `pending → started → verified | failed`, plus
//! `disabled`.
//!
//! Verification compares a checksum computed on the secondary with the one
//! the primary recorded. Only synced records can be verified.

use crate::clock::{duration_millis, Clock};
use crate::config::GeoConfig;
use crate::error::{CoreError, CoreResult};
use crate::record::{RegistryRecord, SyncState, VerificationState};
use crate::replicable::Replicable;
use crate::store::{RegistryTable, Write};
use crate::sync::ClaimOutcome;
use crate::types::{truncate_message, Checksum, ResourceId, Timestamp};
use std::sync::Arc;

/// Failure message recorded on a checksum mismatch.
pub const CHECKSUM_MISMATCH_MESSAGE: &str = "checksum mismatch";

/// Failure message recorded when the primary has no checksum yet.
pub const PRIMARY_CHECKSUM_UNAVAILABLE: &str = "primary checksum unavailable";

/// Drives the verification state of one replicator class's records.
pub struct VerificationStateMachine {
    table: Arc<RegistryTable>,
    replicator: Arc<dyn Replicable>,
    clock: Arc<dyn Clock>,
    config: GeoConfig,
}

impl VerificationStateMachine {
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

    /// Time before which a `started` verification claim counts as stalled.
    pub fn stall_cutoff(&self) -> Timestamp {
        self.clock
            .now()
            .saturating_sub(duration_millis(self.config.verification_stall_threshold))
    }

    /// Claims `record` for a verification attempt.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidTransition`] if the stored record is not synced,
    /// or is `verified` or `disabled`. A concurrent change or a fresh claim
    /// is reported as [`ClaimOutcome::Conflict`].
    pub fn start_verification(&self, record: &RegistryRecord) -> CoreResult<ClaimOutcome> {
        let now = self.clock.now();
        let cutoff = self.stall_cutoff();
        let expected_version = record.lock_version;

        let claimed = self.table.mutate(record.resource_id, |stored| {
            if stored.lock_version != expected_version {
                return Ok(Write::Skip);
            }
            if stored.state != SyncState::Synced {
                return Err(self.invalid(stored, "start_verification", stored.state));
            }
            match stored.verification_state {
                VerificationState::Pending | VerificationState::Failed => {}
                VerificationState::Started if stored.verification_claim_stalled(cutoff) => {}
                VerificationState::Started => return Ok(Write::Skip),
                state @ (VerificationState::Verified | VerificationState::Disabled) => {
                    return Err(self.invalid(stored, "start_verification", state));
                }
            }
            stored.verification_state = VerificationState::Started;
            stored.verification_started_at = Some(now);
            Ok(Write::Commit)
        })?;

        Ok(match claimed {
            Some(record) => {
                tracing::debug!(
                    replicator = self.replicator.name(),
                    resource_id = %record.resource_id,
                    retry_count = record.verification_retry_count,
                    "verification started"
                );
                ClaimOutcome::Claimed(record)
            }
            None => ClaimOutcome::Conflict,
        })
    }

    /// Compares `computed` against the primary checksum and records the
    /// outcome.
    ///
    /// A match marks the record `verified`. A mismatch marks it `failed` with
    /// both checksums stored. When the primary has no checksum, or the
    /// provider fails, the attempt is recorded as a plain verification
    /// failure.
    pub fn mark_verified(&self, record: &RegistryRecord, computed: Checksum) -> CoreResult<RegistryRecord> {
        let stored = self.table.fetch(record.resource_id)?;
        self.require_claim(&stored, record, "mark_verified")?;

        let primary = match self.replicator.primary_checksum(record.resource_id) {
            Ok(Some(primary)) => primary,
            Ok(None) => return self.mark_verification_failed(record, PRIMARY_CHECKSUM_UNAVAILABLE),
            Err(e) => return self.mark_verification_failed(record, &e.to_string()),
        };

        if primary != computed {
            return self.record_mismatch(record, computed, primary);
        }

        let now = self.clock.now();
        let updated = self.table.update(record.resource_id, |stored| {
            self.require_claim(stored, record, "mark_verified")?;

            stored.verification_state = VerificationState::Verified;
            stored.verified_at = Some(now);
            stored.verification_checksum = Some(computed);
            stored.verification_checksum_mismatched = None;
            stored.checksum_mismatch = false;
            stored.verification_failure = None;
            stored.verification_retry_at = None;
            stored.verification_retry_count = 0;
            stored.verification_started_at = None;
            Ok(())
        })?;

        tracing::debug!(
            replicator = self.replicator.name(),
            resource_id = %updated.resource_id,
            "verification succeeded"
        );
        Ok(updated)
    }

    /// Records a verification attempt that could not produce a checksum.
    pub fn mark_verification_failed(&self, record: &RegistryRecord, reason: &str) -> CoreResult<RegistryRecord> {
        let now = self.clock.now();

        let updated = self.table.update(record.resource_id, |stored| {
            self.require_claim(stored, record, "mark_verification_failed")?;
            stored.verification_checksum = None;
            stored.verification_checksum_mismatched = None;
            stored.checksum_mismatch = false;
            self.record_failure(stored, now, reason);
            Ok(())
        })?;

        tracing::warn!(
            replicator = self.replicator.name(),
            resource_id = %updated.resource_id,
            retry_count = updated.verification_retry_count,
            reason,
            "verification failed"
        );
        Ok(updated)
    }

    /// Turns verification off for the record.
    ///
    /// Allowed from every state except a fresh `started` claim.
    pub fn disable_verification(&self, record: &RegistryRecord) -> CoreResult<RegistryRecord> {
        let cutoff = self.stall_cutoff();

        let updated = self.table.mutate(record.resource_id, |stored| {
            match stored.verification_state {
                VerificationState::Disabled => return Ok(Write::Skip),
                VerificationState::Started if !stored.verification_claim_stalled(cutoff) => {
                    return Err(self.invalid(
                        stored,
                        "disable_verification",
                        VerificationState::Started,
                    ));
                }
                _ => {}
            }
            stored.verification_state = VerificationState::Disabled;
            stored.verification_started_at = None;
            stored.verification_retry_at = None;
            stored.verification_retry_count = 0;
            Ok(Write::Commit)
        })?;

        match updated {
            Some(updated) => {
                tracing::debug!(
                    replicator = self.replicator.name(),
                    resource_id = %updated.resource_id,
                    "verification disabled"
                );
                Ok(updated)
            }
            None => self.table.fetch(record.resource_id),
        }
    }

    /// Queues a synced record for another verification, for instance after
    /// the primary recomputed its checksum.
    ///
    /// Returns `None` and changes nothing if the record is not synced, is
    /// being verified, or has verification disabled.
    pub fn mark_verification_pending(&self, record: &RegistryRecord) -> CoreResult<Option<RegistryRecord>> {
        let updated = self.table.mutate(record.resource_id, |stored| {
            let eligible = stored.state == SyncState::Synced
                && !matches!(
                    stored.verification_state,
                    VerificationState::Started | VerificationState::Disabled
                );
            if !eligible {
                return Ok(Write::Skip);
            }
            stored.verification_state = VerificationState::Pending;
            stored.verification_retry_at = None;
            stored.verification_retry_count = 0;
            Ok(Write::Commit)
        })?;

        if let Some(updated) = &updated {
            tracing::debug!(
                replicator = self.replicator.name(),
                resource_id = %updated.resource_id,
                "verification pending"
            );
        }
        Ok(updated)
    }

    /// Fails every verification claim older than the stall threshold.
    ///
    /// Returns the number of records failed.
    pub fn fail_verification_timeouts(&self) -> CoreResult<usize> {
        let cutoff = self.stall_cutoff();
        let now = self.clock.now();
        let message = format!(
            "Verification timed out after {}",
            format_duration(self.config.verification_stall_threshold.as_secs())
        );

        let mut failed = 0;
        for resource_id in self.table.verification_started_before(cutoff, usize::MAX) {
            let result = self.table.mutate(resource_id, |stored| {
                if !stored.verification_claim_stalled(cutoff) {
                    return Ok(Write::Skip);
                }
                stored.verification_checksum = None;
                stored.verification_checksum_mismatched = None;
                stored.checksum_mismatch = false;
                stored.verification_state = VerificationState::Failed;
                stored.verification_failure = Some(truncate_message(&message));
                stored.verification_retry_count = 1;
                stored.verification_retry_at = Some(self.config.backoff.next_retry_at(now, 1));
                stored.verification_started_at = None;
                Ok(Write::Commit)
            });
            match result {
                Ok(Some(_)) => failed += 1,
                Ok(None) => {}
                Err(CoreError::RecordNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if failed > 0 {
            tracing::warn!(replicator = self.replicator.name(), count = failed, "verification timeouts failed");
        }
        Ok(failed)
    }

    /// Sends up to `limit` records verified before the minimum
    /// reverification interval back to `pending`, oldest first.
    ///
    /// Returns the number of records reset.
    pub fn reverify_batch(&self, limit: usize) -> CoreResult<usize> {
        let cutoff = self
            .clock
            .now()
            .saturating_sub(duration_millis(self.config.minimum_reverification_interval));

        let mut reset = 0;
        for resource_id in self.table.verified_before(cutoff, limit) {
            let result = self.table.mutate(resource_id, |stored| {
                let due = stored.verification_state == VerificationState::Verified
                    && stored.verified_at.map_or(true, |at| at < cutoff);
                if !due {
                    return Ok(Write::Skip);
                }
                stored.verification_state = VerificationState::Pending;
                Ok(Write::Commit)
            });
            match result {
                Ok(Some(_)) => reset += 1,
                Ok(None) => {}
                Err(CoreError::RecordNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if reset > 0 {
            tracing::info!(replicator = self.replicator.name(), count = reset, "reverification scheduled");
        }
        Ok(reset)
    }

    /// Counts verified records older than the minimum reverification
    /// interval, up to `limit`.
    pub fn needs_reverification_count(&self, limit: usize) -> usize {
        let cutoff = self
            .clock
            .now()
            .saturating_sub(duration_millis(self.config.minimum_reverification_interval));
        self.table.verified_before(cutoff, limit).len()
    }

    /// Looks up the stored record.
    pub fn fetch(&self, resource_id: ResourceId) -> CoreResult<RegistryRecord> {
        self.table.fetch(resource_id)
    }

    fn record_mismatch(
        &self,
        record: &RegistryRecord,
        computed: Checksum,
        primary: Checksum,
    ) -> CoreResult<RegistryRecord> {
        let now = self.clock.now();
        let local_hex = computed.to_hex();
        let primary_hex = primary.to_hex();

        let updated = self.table.update(record.resource_id, |stored| {
            self.require_claim(stored, record, "mark_verified")?;
            stored.verification_checksum = Some(computed);
            stored.verification_checksum_mismatched = Some(primary);
            stored.checksum_mismatch = true;
            self.record_failure(stored, now, CHECKSUM_MISMATCH_MESSAGE);
            Ok(())
        })?;

        tracing::warn!(
            replicator = self.replicator.name(),
            resource_id = %updated.resource_id,
            retry_count = updated.verification_retry_count,
            local = %local_hex,
            primary = %primary_hex,
            "checksum mismatch"
        );
        Ok(updated)
    }

    /// Shared failure bookkeeping; optionally fails the sync state as well.
    fn record_failure(&self, stored: &mut RegistryRecord, now: Timestamp, reason: &str) {
        stored.verification_state = VerificationState::Failed;
        stored.verification_retry_count = stored.verification_retry_count.saturating_add(1);
        stored.verification_retry_at = Some(
            self.config
                .backoff
                .next_retry_at(now, stored.verification_retry_count),
        );
        stored.verification_failure = Some(truncate_message(reason));
        stored.verification_started_at = None;

        if self.config.resync_on_verification_failure {
            stored.state = SyncState::Failed;
            stored.retry_count = stored.retry_count.saturating_add(1);
            stored.retry_at = Some(self.config.backoff.next_retry_at(now, stored.retry_count));
            stored.last_sync_failure = Some(truncate_message(&format!(
                "Verification failed with: {reason}"
            )));
        }
    }

    /// The stored record must still carry the caller's claim, identified by
    /// its `verification_started_at`.
    fn require_claim(
        &self,
        stored: &RegistryRecord,
        claim: &RegistryRecord,
        operation: &'static str,
    ) -> CoreResult<()> {
        if stored.state == SyncState::Synced
            && stored.verification_state == VerificationState::Started
            && stored.verification_started_at == claim.verification_started_at
        {
            return Ok(());
        }
        if claim.verification_started_at.is_some()
            && stored.verification_started_at != claim.verification_started_at
        {
            return Err(CoreError::ClaimSuperseded {
                replicator: self.replicator.name().to_string(),
                resource_id: stored.resource_id,
                operation,
            });
        }
        if stored.state != SyncState::Synced {
            return Err(self.invalid(stored, operation, stored.state));
        }
        Err(self.invalid(stored, operation, stored.verification_state))
    }

    fn invalid(&self, stored: &RegistryRecord, operation: &'static str, from: impl std::fmt::Debug) -> CoreError {
        CoreError::invalid_transition(self.replicator.name(), stored.resource_id, operation, from)
    }
}

impl std::fmt::Debug for VerificationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationStateMachine")
            .field("replicator", &self.replicator.name())
            .finish()
    }
}

/// Renders whole seconds as the largest exact unit, e.g. `8 hours`.
fn format_duration(secs: u64) -> String {
    const UNITS: [(u64, &str); 4] = [(86_400, "day"), (3_600, "hour"), (60, "minute"), (1, "second")];
    for (size, unit) in UNITS {
        if secs >= size && secs % size == 0 {
            let n = secs / size;
            return if n == 1 {
                format!("1 {unit}")
            } else {
                format!("{n} {unit}s")
            };
        }
    }
    "0 seconds".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::clock::ManualClock;
    use crate::replicable::{MemoryChecksumProvider, ReplicationStrategy, ReplicatorClass};
    use crate::sync::SyncStateMachine;
    use std::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        checksums: Arc<MemoryChecksumProvider>,
        sync: SyncStateMachine,
        verification: VerificationStateMachine,
    }

    fn fixture_with(config: GeoConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let checksums = Arc::new(MemoryChecksumProvider::new());
        let class = Arc::new(ReplicatorClass::new(
            "upload",
            ReplicationStrategy::Blob,
            checksums.clone(),
        ));
        let table = Arc::new(RegistryTable::new("upload"));
        let config = config.backoff(BackoffPolicy::deterministic());
        Fixture {
            sync: SyncStateMachine::new(table.clone(), class.clone(), clock.clone(), config.clone()),
            verification: VerificationStateMachine::new(table, class, clock.clone(), config),
            clock,
            checksums,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(GeoConfig::new())
    }

    fn synced(fx: &Fixture, id: u64) -> RegistryRecord {
        let record = fx.sync.table().ensure(ResourceId::new(id)).unwrap();
        let claimed = fx.sync.start_sync(&record).unwrap().into_record().unwrap();
        fx.sync.mark_synced(&claimed).unwrap()
    }

    fn claimed(fx: &Fixture, id: u64) -> RegistryRecord {
        let record = synced(fx, id);
        fx.verification
            .start_verification(&record)
            .unwrap()
            .into_record()
            .unwrap()
    }

    fn sum(bytes: &[u8]) -> Checksum {
        Checksum::from_bytes(bytes.to_vec())
    }

    #[test]
    fn matching_checksum_verifies() {
        let fx = fixture();
        fx.checksums.set("upload", ResourceId::new(1), sum(b"abc"));
        let record = claimed(&fx, 1);

        let verified = fx.verification.mark_verified(&record, sum(b"abc")).unwrap();
        assert_eq!(verified.verification_state(), VerificationState::Verified);
        assert_eq!(verified.verified_at(), Some(1_000_000));
        assert_eq!(verified.verification_checksum(), Some(&sum(b"abc")));
        assert!(!verified.checksum_mismatch());
        assert!(verified.invariant_violations().is_empty());
    }

    #[test]
    fn differing_checksum_records_mismatch() {
        let fx = fixture();
        fx.checksums.set("upload", ResourceId::new(1), sum(b"primary"));
        let record = claimed(&fx, 1);

        let failed = fx.verification.mark_verified(&record, sum(b"local")).unwrap();
        assert_eq!(failed.verification_state(), VerificationState::Failed);
        assert!(failed.checksum_mismatch());
        assert_eq!(failed.verification_checksum(), Some(&sum(b"local")));
        assert_eq!(failed.verification_checksum_mismatched(), Some(&sum(b"primary")));
        assert_eq!(failed.verification_failure(), Some(CHECKSUM_MISMATCH_MESSAGE));
        assert_eq!(failed.verification_retry_count(), 1);
        assert_eq!(failed.verification_retry_at(), Some(1_046_000));
        assert_eq!(failed.state(), SyncState::Synced);
        assert!(failed.invariant_violations().is_empty());
    }

    #[test]
    fn success_after_mismatch_clears_mismatch_fields() {
        let fx = fixture();
        fx.checksums.set("upload", ResourceId::new(1), sum(b"primary"));
        let record = claimed(&fx, 1);
        let failed = fx.verification.mark_verified(&record, sum(b"local")).unwrap();

        fx.clock.set(failed.verification_retry_at().unwrap());
        let retry = fx
            .verification
            .start_verification(&failed)
            .unwrap()
            .into_record()
            .unwrap();
        let verified = fx.verification.mark_verified(&retry, sum(b"primary")).unwrap();
        assert!(!verified.checksum_mismatch());
        assert_eq!(verified.verification_checksum_mismatched(), None);
        assert_eq!(verified.verification_retry_count(), 0);
        assert_eq!(verified.verification_failure(), None);
    }

    #[test]
    fn stale_claim_cannot_complete_a_reclaimed_verification() {
        let fx = fixture();
        fx.checksums.set("upload", ResourceId::new(1), sum(b"abc"));
        let first = claimed(&fx, 1);

        fx.clock.advance(Duration::from_secs(9 * 60 * 60));
        let second = fx
            .verification
            .start_verification(&first)
            .unwrap()
            .into_record()
            .unwrap();

        assert!(fx
            .verification
            .mark_verified(&first, sum(b"abc"))
            .unwrap_err()
            .is_superseded());
        assert!(fx
            .verification
            .mark_verification_failed(&first, "late")
            .unwrap_err()
            .is_superseded());
        assert_eq!(fx.verification.fetch(ResourceId::new(1)).unwrap(), second);

        let verified = fx.verification.mark_verified(&second, sum(b"abc")).unwrap();
        assert_eq!(verified.verification_state(), VerificationState::Verified);
    }

    #[test]
    fn resync_supersedes_an_inflight_verification() {
        let fx = fixture();
        let claim = claimed(&fx, 1);
        fx.sync.start_sync(&claim).unwrap().into_record().unwrap();

        let err = fx
            .verification
            .mark_verification_failed(&claim, "late")
            .unwrap_err();
        assert!(err.is_superseded());
    }

    #[test]
    fn missing_primary_checksum_fails_without_mismatch() {
        let fx = fixture();
        let record = claimed(&fx, 1);

        let failed = fx.verification.mark_verified(&record, sum(b"local")).unwrap();
        assert_eq!(failed.verification_state(), VerificationState::Failed);
        assert!(!failed.checksum_mismatch());
        assert_eq!(failed.verification_checksum(), None);
        assert_eq!(failed.verification_failure(), Some(PRIMARY_CHECKSUM_UNAVAILABLE));
    }

    #[test]
    fn unsynced_record_cannot_start_verification() {
        let fx = fixture();
        let record = fx.sync.table().ensure(ResourceId::new(1)).unwrap();
        let err = fx.verification.start_verification(&record).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn verified_record_cannot_be_claimed() {
        let fx = fixture();
        fx.checksums.set("upload", ResourceId::new(1), sum(b"abc"));
        let record = claimed(&fx, 1);
        let verified = fx.verification.mark_verified(&record, sum(b"abc")).unwrap();

        assert!(fx
            .verification
            .start_verification(&verified)
            .unwrap_err()
            .is_contract_violation());
    }

    #[test]
    fn concurrent_claim_conflicts() {
        let fx = fixture();
        let record = synced(&fx, 1);
        assert!(fx.verification.start_verification(&record).unwrap().is_claimed());
        assert_eq!(
            fx.verification.start_verification(&record).unwrap(),
            ClaimOutcome::Conflict
        );
    }

    #[test]
    fn failure_clears_checksum_and_schedules_retry() {
        let fx = fixture();
        let record = claimed(&fx, 1);
        let failed = fx
            .verification
            .mark_verification_failed(&record, "file missing")
            .unwrap();
        assert_eq!(failed.verification_state(), VerificationState::Failed);
        assert_eq!(failed.verification_failure(), Some("file missing"));
        assert_eq!(failed.verification_checksum(), None);
        assert_eq!(failed.verification_retry_count(), 1);
        assert!(!failed.verification_due(fx.clock.now()));
    }

    #[test]
    fn resync_on_failure_fails_sync_state() {
        let fx = fixture_with(GeoConfig::new().resync_on_verification_failure(true));
        fx.checksums.set("upload", ResourceId::new(1), sum(b"primary"));
        let record = claimed(&fx, 1);

        let failed = fx.verification.mark_verified(&record, sum(b"local")).unwrap();
        assert_eq!(failed.state(), SyncState::Failed);
        assert_eq!(failed.retry_count(), 1);
        assert_eq!(
            failed.last_sync_failure(),
            Some("Verification failed with: checksum mismatch")
        );
        assert!(failed.retry_at().is_some());
    }

    #[test]
    fn disable_rules() {
        let fx = fixture();
        let pending = synced(&fx, 1);
        let disabled = fx.verification.disable_verification(&pending).unwrap();
        assert_eq!(disabled.verification_state(), VerificationState::Disabled);
        assert_eq!(
            fx.verification.disable_verification(&disabled).unwrap().lock_version(),
            disabled.lock_version()
        );

        let started = claimed(&fx, 2);
        assert!(fx
            .verification
            .disable_verification(&started)
            .unwrap_err()
            .is_contract_violation());

        fx.clock.advance(Duration::from_secs(9 * 60 * 60));
        let stalled = fx.verification.disable_verification(&started).unwrap();
        assert_eq!(stalled.verification_state(), VerificationState::Disabled);
    }

    #[test]
    fn timeouts_fail_stalled_claims() {
        let fx = fixture();
        claimed(&fx, 1);
        fx.clock.advance(Duration::from_secs(60));
        claimed(&fx, 2);

        fx.clock.advance(Duration::from_secs(8 * 60 * 60 - 30));
        assert_eq!(fx.verification.fail_verification_timeouts().unwrap(), 1);

        let timed_out = fx.verification.fetch(ResourceId::new(1)).unwrap();
        assert_eq!(timed_out.verification_state(), VerificationState::Failed);
        assert_eq!(timed_out.verification_retry_count(), 1);
        assert_eq!(
            timed_out.verification_failure(),
            Some("Verification timed out after 8 hours")
        );
        assert_eq!(
            fx.verification.fetch(ResourceId::new(2)).unwrap().verification_state(),
            VerificationState::Started
        );
    }

    #[test]
    fn reverify_old_verifications_oldest_first() {
        let fx = fixture();
        for id in 1..=3 {
            fx.checksums.set("upload", ResourceId::new(id), sum(b"abc"));
            let record = claimed(&fx, id);
            fx.verification.mark_verified(&record, sum(b"abc")).unwrap();
            fx.clock.advance(Duration::from_secs(60));
        }

        assert_eq!(fx.verification.reverify_batch(10).unwrap(), 0);
        fx.clock.advance(Duration::from_secs(90 * 24 * 60 * 60));
        assert_eq!(fx.verification.needs_reverification_count(10), 3);

        assert_eq!(fx.verification.reverify_batch(2).unwrap(), 2);
        let states: Vec<_> = (1..=3)
            .map(|id| fx.verification.fetch(ResourceId::new(id)).unwrap().verification_state())
            .collect();
        assert_eq!(
            states,
            vec![
                VerificationState::Pending,
                VerificationState::Pending,
                VerificationState::Verified
            ]
        );
    }

    #[test]
    fn pending_reset_only_for_synced_idle_records() {
        let fx = fixture();
        fx.checksums.set("upload", ResourceId::new(1), sum(b"abc"));
        let record = claimed(&fx, 1);
        assert!(fx.verification.mark_verification_pending(&record).unwrap().is_none());

        let verified = fx.verification.mark_verified(&record, sum(b"abc")).unwrap();
        let pending = fx
            .verification
            .mark_verification_pending(&verified)
            .unwrap()
            .unwrap();
        assert_eq!(pending.verification_state(), VerificationState::Pending);

        let unsynced = fx.sync.table().ensure(ResourceId::new(2)).unwrap();
        assert!(fx.verification.mark_verification_pending(&unsynced).unwrap().is_none());
    }

    #[test]
    fn durations_render_in_largest_unit() {
        assert_eq!(format_duration(8 * 3_600), "8 hours");
        assert_eq!(format_duration(86_400), "1 day");
        assert_eq!(format_duration(90), "90 seconds");
        assert_eq!(format_duration(0), "0 seconds");
    }
}
