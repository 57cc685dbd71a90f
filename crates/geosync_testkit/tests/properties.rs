//! Property tests over random registry operation sequences.

use geosync_core::{allocate, BackoffPolicy, Clock, RegistryRecord, ResourceId, SyncState};
use geosync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::time::Duration;

fn assert_invariants(registry: &TestRegistry) -> Result<(), TestCaseError> {
    for record in registry.table.records() {
        let violations = record.invariant_violations();
        prop_assert!(
            violations.is_empty(),
            "record {} violates {:?}: {:?}",
            record.resource_id(),
            violations,
            record
        );
    }
    Ok(())
}

fn ids(records: impl IntoIterator<Item = RegistryRecord>) -> BTreeSet<ResourceId> {
    records.into_iter().map(|r| r.resource_id()).collect()
}

proptest! {
    #[test]
    fn invariants_hold_after_every_step(ops in registry_ops_strategy(6, 80)) {
        let registry = TestRegistry::memory();
        for op in &ops {
            apply_op(&registry, op).map_err(|e| TestCaseError::fail(e.to_string()))?;
            assert_invariants(&registry)?;
        }
    }

    #[test]
    fn batch_selection_matches_a_full_scan(ops in registry_ops_strategy(8, 60)) {
        let registry = TestRegistry::memory();
        apply_ops(&registry, &ops).map_err(|e| TestCaseError::fail(e.to_string()))?;

        let now = registry.clock.now();
        let sync_cutoff = registry.sync.stall_cutoff();
        let verification_cutoff = registry.verification.stall_cutoff();
        let records = registry.table.records();

        let expected_sync = ids(records.iter().cloned().filter(|r| {
            r.sync_due(now) || r.sync_claim_stalled(sync_cutoff)
        }));
        prop_assert_eq!(ids(registry.selector.next_sync_batch(usize::MAX)), expected_sync);

        let expected_verification = ids(records.into_iter().filter(|r| {
            r.verification_due(now) || r.verification_claim_stalled(verification_cutoff)
        }));
        prop_assert_eq!(
            ids(registry.selector.next_verification_batch(usize::MAX)),
            expected_verification
        );
    }

    #[test]
    fn failures_only_ever_raise_retry_counts(ops in registry_ops_strategy(4, 60)) {
        let registry = TestRegistry::memory();
        for op in &ops {
            let before = match op {
                RegistryOp::MarkFailed(id) => registry.table.get(ResourceId::new(*id)),
                _ => None,
            };
            let outcome = apply_op(&registry, op).map_err(|e| TestCaseError::fail(e.to_string()))?;

            if let (Some(before), OpOutcome::Applied) = (before, outcome) {
                let after = registry.table.fetch(before.resource_id()).map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(after.state(), SyncState::Failed);
                prop_assert_eq!(after.retry_count(), before.retry_count() + 1);
                prop_assert!(after.retry_at() > Some(registry.clock.now()));
            }
        }
    }

    #[test]
    fn backoff_never_decreases(failures in 1u32..200) {
        let policy = BackoffPolicy::new();
        let current = policy.delay_for(failures);
        let next = policy.delay_for(failures + 1);
        prop_assert!(current <= policy.max_delay);
        if next < policy.max_delay {
            prop_assert!(current < next);
        } else {
            prop_assert!(current <= next);
        }
    }

    #[test]
    fn capacity_share_is_bounded(total in 0usize..1_000, classes in 0usize..40, legacy in 0usize..3) {
        let share = allocate(total, &vec![(); classes], legacy);
        prop_assert!(share >= 1);
        prop_assert!(share <= total.max(1));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn journal_replay_restores_identical_records(ops in registry_ops_strategy(5, 40)) {
        let registry = TestRegistry::file();
        apply_ops(&registry, &ops).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(registry.replayed_records(), registry.table.records());
    }
}

#[test]
fn stalled_claims_are_reselected() {
    let registry = TestRegistry::memory();
    let record = registry.seed(1);
    registry.sync.start_sync(&record).unwrap();
    assert!(registry.selector.next_sync_batch(10).is_empty());

    registry.clock.advance(Duration::from_secs(8 * 60 * 60 + 1));
    let batch = registry.selector.next_sync_batch(10);
    assert_eq!(ids(batch), BTreeSet::from([ResourceId::new(1)]));
}

#[test]
fn concurrent_claims_never_duplicate() {
    let result = stress_concurrent_sync_claims(&ClaimStressConfig::default());
    result.print_summary("concurrent sync claims");
    assert_eq!(result.duplicate_claims, 0);
    assert_eq!(result.unclaimed, 0);
    assert_eq!(result.claims, 200 * 5);
}
