//! Selection of the next records to sync or verify.
//!
//! Both queries return records whose timestamp is null first (never failed,
//! or holding a stalled claim), then records whose retry time has elapsed in
//! retry order, with ties broken by resource id. They are served from the
//! table's partial indexes, so cost tracks the batch size rather than the
//! table size.

use crate::clock::{duration_millis, Clock};
use crate::config::GeoConfig;
use crate::error::{CoreError, CoreResult};
use crate::record::RegistryRecord;
use crate::store::RegistryTable;
use crate::sync::{ClaimOutcome, SyncStateMachine};
use crate::types::ResourceId;
use crate::verification::VerificationStateMachine;
use std::sync::Arc;

/// Picks eligible records from one class's table.
pub struct BatchSelector {
    table: Arc<RegistryTable>,
    clock: Arc<dyn Clock>,
    config: GeoConfig,
}

impl BatchSelector {
    /// Creates a selector over `table`.
    pub fn new(table: Arc<RegistryTable>, clock: Arc<dyn Clock>, config: GeoConfig) -> Self {
        Self {
            table,
            clock,
            config,
        }
    }

    /// Up to `limit` records due for sync.
    pub fn next_sync_batch(&self, limit: usize) -> Vec<RegistryRecord> {
        self.load(self.sync_ids(limit))
    }

    /// Up to `limit` synced records due for verification.
    pub fn next_verification_batch(&self, limit: usize) -> Vec<RegistryRecord> {
        self.load(self.verification_ids(limit))
    }

    /// Selects up to `limit` records and claims each for sync.
    ///
    /// Records another worker claimed or removed in between are skipped.
    pub fn claim_sync_batch(&self, machine: &SyncStateMachine, limit: usize) -> CoreResult<Vec<RegistryRecord>> {
        self.claim_for_sync(machine, self.next_sync_batch(limit))
    }

    /// Claims already selected records for sync, skipping those that changed
    /// or vanished since.
    pub fn claim_for_sync(
        &self,
        machine: &SyncStateMachine,
        selected: Vec<RegistryRecord>,
    ) -> CoreResult<Vec<RegistryRecord>> {
        let mut claimed = Vec::new();
        for record in selected {
            match machine.start_sync(&record) {
                Ok(ClaimOutcome::Claimed(record)) => claimed.push(record),
                Ok(ClaimOutcome::Conflict) => {}
                Err(e @ CoreError::RecordNotFound { .. }) => self.skip(&record, &e),
                Err(e) => return Err(e),
            }
        }
        Ok(claimed)
    }

    /// Selects up to `limit` records and claims each for verification.
    ///
    /// Records that changed since selection are skipped, including ones that
    /// are no longer eligible or were removed by the time the claim runs.
    pub fn claim_verification_batch(
        &self,
        machine: &VerificationStateMachine,
        limit: usize,
    ) -> CoreResult<Vec<RegistryRecord>> {
        self.claim_for_verification(machine, self.next_verification_batch(limit))
    }

    /// Claims already selected records for verification.
    pub fn claim_for_verification(
        &self,
        machine: &VerificationStateMachine,
        selected: Vec<RegistryRecord>,
    ) -> CoreResult<Vec<RegistryRecord>> {
        let mut claimed = Vec::new();
        for record in selected {
            match machine.start_verification(&record) {
                Ok(ClaimOutcome::Claimed(record)) => claimed.push(record),
                Ok(ClaimOutcome::Conflict) => {}
                Err(e) if e.is_contract_violation() || matches!(e, CoreError::RecordNotFound { .. }) => {
                    self.skip(&record, &e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(claimed)
    }

    /// Number of records due for sync, counting at most `limit`.
    pub fn needs_sync_count(&self, limit: usize) -> usize {
        self.sync_ids(limit).len()
    }

    /// Number of records due for verification, counting at most `limit`.
    pub fn needs_verification_count(&self, limit: usize) -> usize {
        self.verification_ids(limit).len()
    }

    /// Verification batches still to run this cycle, at most `max_batches`.
    pub fn remaining_verification_batch_count(&self, max_batches: usize, batch_size: usize) -> usize {
        if batch_size == 0 {
            return 0;
        }
        let due = self.needs_verification_count(max_batches.saturating_mul(batch_size));
        due.div_ceil(batch_size)
    }

    fn skip(&self, record: &RegistryRecord, error: &CoreError) {
        tracing::debug!(
            replicator = self.table.replicator(),
            resource_id = %record.resource_id(),
            error = %error,
            "skipping record that changed after selection"
        );
    }

    fn sync_ids(&self, limit: usize) -> Vec<ResourceId> {
        let now = self.clock.now();
        let cutoff = now.saturating_sub(duration_millis(self.config.sync_stall_threshold));
        self.table.sync_batch(now, cutoff, limit)
    }

    fn verification_ids(&self, limit: usize) -> Vec<ResourceId> {
        let now = self.clock.now();
        let cutoff = now.saturating_sub(duration_millis(self.config.verification_stall_threshold));
        self.table.verification_batch(now, cutoff, limit)
    }

    fn load(&self, ids: Vec<ResourceId>) -> Vec<RegistryRecord> {
        ids.into_iter().filter_map(|id| self.table.get(id)).collect()
    }
}

impl std::fmt::Debug for BatchSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSelector")
            .field("replicator", &self.table.replicator())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::clock::ManualClock;
    use crate::record::SyncState;
    use crate::replicable::{MemoryChecksumProvider, ReplicationStrategy, ReplicatorClass};
    use std::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        sync: SyncStateMachine,
        verification: VerificationStateMachine,
        selector: BatchSelector,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let class = Arc::new(ReplicatorClass::new(
            "upload",
            ReplicationStrategy::Blob,
            Arc::new(MemoryChecksumProvider::new()),
        ));
        let table = Arc::new(RegistryTable::new("upload"));
        let config = GeoConfig::new().backoff(BackoffPolicy::deterministic());
        Fixture {
            sync: SyncStateMachine::new(table.clone(), class.clone(), clock.clone(), config.clone()),
            verification: VerificationStateMachine::new(
                table.clone(),
                class,
                clock.clone(),
                config.clone(),
            ),
            selector: BatchSelector::new(table, clock.clone(), config),
            clock,
        }
    }

    fn ids(records: &[RegistryRecord]) -> Vec<u64> {
        records.iter().map(|r| r.resource_id().as_u64()).collect()
    }

    fn fail(fx: &Fixture, id: u64) -> RegistryRecord {
        let record = fx.sync.table().ensure(ResourceId::new(id)).unwrap();
        let claimed = fx.sync.start_sync(&record).unwrap().into_record().unwrap();
        fx.sync.mark_failed(&claimed, "boom").unwrap()
    }

    #[test]
    fn records_removed_after_selection_are_skipped() {
        let fx = fixture();
        for id in 1..=3 {
            fx.sync.table().ensure(ResourceId::new(id)).unwrap();
        }
        let selected = fx.selector.next_sync_batch(10);
        fx.sync.table().remove(ResourceId::new(2)).unwrap();

        let claimed = fx.selector.claim_for_sync(&fx.sync, selected).unwrap();
        assert_eq!(ids(&claimed), vec![1, 3]);
        assert!(claimed.iter().all(|r| r.state() == SyncState::Started));

        for record in &claimed {
            fx.sync.mark_synced(record).unwrap();
        }
        fx.sync.table().ensure(ResourceId::new(4)).unwrap();
        let selected = fx.selector.next_verification_batch(10);
        fx.sync.table().remove(ResourceId::new(1)).unwrap();

        let claimed = fx
            .selector
            .claim_for_verification(&fx.verification, selected)
            .unwrap();
        assert_eq!(ids(&claimed), vec![3]);
    }

    #[test]
    fn sync_batch_orders_nulls_first() {
        let fx = fixture();
        fail(&fx, 1);
        fx.clock.advance(Duration::from_secs(10));
        fail(&fx, 2);
        fx.sync.table().ensure(ResourceId::new(3)).unwrap();

        assert_eq!(ids(&fx.selector.next_sync_batch(10)), vec![3]);

        fx.clock.advance(Duration::from_secs(60));
        assert_eq!(ids(&fx.selector.next_sync_batch(10)), vec![3, 1, 2]);
        assert_eq!(ids(&fx.selector.next_sync_batch(2)), vec![3, 1]);
        assert_eq!(fx.selector.needs_sync_count(10), 3);
    }

    #[test]
    fn claimed_records_leave_the_batch() {
        let fx = fixture();
        for id in 1..=4 {
            fx.sync.table().ensure(ResourceId::new(id)).unwrap();
        }

        let claimed = fx.selector.claim_sync_batch(&fx.sync, 3).unwrap();
        assert_eq!(ids(&claimed), vec![1, 2, 3]);
        assert!(claimed.iter().all(|r| r.state() == SyncState::Started));
        assert_eq!(ids(&fx.selector.next_sync_batch(10)), vec![4]);
    }

    #[test]
    fn stalled_sync_claims_are_reselected() {
        let fx = fixture();
        fx.sync.table().ensure(ResourceId::new(1)).unwrap();
        fx.selector.claim_sync_batch(&fx.sync, 10).unwrap();
        assert!(fx.selector.next_sync_batch(10).is_empty());

        fx.clock.advance(Duration::from_secs(8 * 60 * 60 + 1));
        let reclaimed = fx.selector.claim_sync_batch(&fx.sync, 10).unwrap();
        assert_eq!(ids(&reclaimed), vec![1]);
    }

    #[test]
    fn verification_batch_only_holds_synced_records() {
        let fx = fixture();
        fx.sync.table().ensure(ResourceId::new(1)).unwrap();
        for record in fx.selector.claim_sync_batch(&fx.sync, 10).unwrap() {
            fx.sync.mark_synced(&record).unwrap();
        }
        fx.sync.table().ensure(ResourceId::new(2)).unwrap();

        assert_eq!(ids(&fx.selector.next_verification_batch(10)), vec![1]);
        let claimed = fx
            .selector
            .claim_verification_batch(&fx.verification, 10)
            .unwrap();
        assert_eq!(ids(&claimed), vec![1]);
        assert!(fx.selector.next_verification_batch(10).is_empty());
    }

    #[test]
    fn remaining_batches_round_up() {
        let fx = fixture();
        for id in 1..=25 {
            fx.sync.table().ensure(ResourceId::new(id)).unwrap();
        }
        for record in fx.selector.claim_sync_batch(&fx.sync, 25).unwrap() {
            fx.sync.mark_synced(&record).unwrap();
        }

        assert_eq!(fx.selector.needs_verification_count(100), 25);
        assert_eq!(fx.selector.remaining_verification_batch_count(10, 10), 3);
        assert_eq!(fx.selector.remaining_verification_batch_count(2, 10), 2);
        assert_eq!(fx.selector.remaining_verification_batch_count(2, 0), 0);
    }
}
