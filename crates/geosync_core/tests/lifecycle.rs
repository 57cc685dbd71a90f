//! End-to-end lifecycle tests for the state machines and batch selector.

use geosync_core::{
    allocate, BackoffPolicy, BatchSelector, Checksum, ClaimOutcome, CoreError, GeoConfig,
    ManualClock, MemoryChecksumProvider, RegistryRecord, RegistryStore, ReplicationStrategy,
    ReplicatorClass, ResourceId, SyncState, SyncStateMachine, VerificationState,
    VerificationStateMachine, LEGACY_VERIFICATION_SCHEDULERS,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

struct Site {
    clock: Arc<ManualClock>,
    checksums: Arc<MemoryChecksumProvider>,
    sync: Arc<SyncStateMachine>,
    verification: VerificationStateMachine,
    selector: BatchSelector,
    store: RegistryStore,
}

fn site() -> Site {
    let store = RegistryStore::in_memory();
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let checksums = Arc::new(MemoryChecksumProvider::new());
    let class = Arc::new(ReplicatorClass::new(
        "job_artifact",
        ReplicationStrategy::Blob,
        checksums.clone(),
    ));
    let table = store.table("job_artifact");
    let config = GeoConfig::new().backoff(BackoffPolicy::deterministic());

    Site {
        sync: Arc::new(SyncStateMachine::new(
            table.clone(),
            class.clone(),
            clock.clone(),
            config.clone(),
        )),
        verification: VerificationStateMachine::new(table.clone(), class, clock.clone(), config.clone()),
        selector: BatchSelector::new(table, clock.clone(), config),
        clock,
        checksums,
        store,
    }
}

fn pending(site: &Site, id: u64) -> RegistryRecord {
    site.store
        .table("job_artifact")
        .ensure(ResourceId::new(id))
        .unwrap()
}

fn checksum(bytes: &[u8]) -> Checksum {
    Checksum::from_bytes(bytes.to_vec())
}

fn assert_consistent(site: &Site) {
    for record in site.store.table("job_artifact").records() {
        assert!(
            record.invariant_violations().is_empty(),
            "record {} violates {:?}",
            record.resource_id(),
            record.invariant_violations()
        );
    }
}

#[test]
fn end_to_end_matching_checksum() {
    let site = site();
    site.checksums
        .set("job_artifact", ResourceId::new(1), checksum(b"checksum_X"));

    let record = pending(&site, 1);
    assert_eq!(record.state(), SyncState::Pending);
    assert_eq!(record.verification_state(), VerificationState::Pending);

    // worker A
    let started = site.sync.start_sync(&record).unwrap().into_record().unwrap();
    assert_eq!(started.state(), SyncState::Started);
    let synced = site.sync.mark_synced(&started).unwrap();
    assert_eq!(synced.state(), SyncState::Synced);
    assert_eq!(synced.retry_count(), 0);
    assert_eq!(synced.verification_state(), VerificationState::Pending);

    // worker B
    let claimed = site
        .verification
        .start_verification(&synced)
        .unwrap()
        .into_record()
        .unwrap();
    assert_eq!(claimed.verification_state(), VerificationState::Started);
    let verified = site
        .verification
        .mark_verified(&claimed, checksum(b"checksum_X"))
        .unwrap();
    assert_eq!(verified.verification_state(), VerificationState::Verified);
    assert!(!verified.checksum_mismatch());

    assert_consistent(&site);
}

#[test]
fn end_to_end_mismatching_checksum() {
    let site = site();
    site.checksums
        .set("job_artifact", ResourceId::new(1), checksum(b"checksum_Y"));

    let record = pending(&site, 1);
    let started = site.sync.start_sync(&record).unwrap().into_record().unwrap();
    let synced = site.sync.mark_synced(&started).unwrap();
    let claimed = site
        .verification
        .start_verification(&synced)
        .unwrap()
        .into_record()
        .unwrap();
    let failed = site
        .verification
        .mark_verified(&claimed, checksum(b"checksum_X"))
        .unwrap();

    assert_eq!(failed.verification_state(), VerificationState::Failed);
    assert!(failed.checksum_mismatch());
    assert_eq!(failed.verification_checksum(), Some(&checksum(b"checksum_X")));
    assert_eq!(
        failed.verification_checksum_mismatched(),
        Some(&checksum(b"checksum_Y"))
    );
    assert_eq!(failed.verification_retry_count(), 1);

    assert_consistent(&site);
}

#[test]
fn mark_synced_twice_fails_the_second_time() {
    let site = site();
    let started = site
        .sync
        .start_sync(&pending(&site, 1))
        .unwrap()
        .into_record()
        .unwrap();
    let synced = site.sync.mark_synced(&started).unwrap();

    match site.sync.mark_synced(&synced) {
        Err(CoreError::InvalidTransition {
            operation, from, ..
        }) => {
            assert_eq!(operation, "mark_synced");
            assert_eq!(from, "Synced");
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[test]
fn failed_record_reappears_once_retry_elapses() {
    let site = site();
    let started = site
        .sync
        .start_sync(&pending(&site, 1))
        .unwrap()
        .into_record()
        .unwrap();
    let failed = site.sync.mark_failed(&started, "x").unwrap();
    let retry_at = failed.retry_at().unwrap();

    site.clock.set(retry_at - 1);
    assert!(site.selector.next_sync_batch(10).is_empty());

    site.clock.set(retry_at);
    let batch = site.selector.next_sync_batch(10);
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].resource_id(), ResourceId::new(1));
}

#[test]
fn resync_resets_verified_record_to_pending() {
    let site = site();
    site.checksums
        .set("job_artifact", ResourceId::new(1), checksum(b"abc"));
    let started = site
        .sync
        .start_sync(&pending(&site, 1))
        .unwrap()
        .into_record()
        .unwrap();
    let synced = site.sync.mark_synced(&started).unwrap();
    let claimed = site
        .verification
        .start_verification(&synced)
        .unwrap()
        .into_record()
        .unwrap();
    let verified = site.verification.mark_verified(&claimed, checksum(b"abc")).unwrap();
    assert_eq!(verified.verification_state(), VerificationState::Verified);

    let restarted = site.sync.start_sync(&verified).unwrap().into_record().unwrap();
    assert_eq!(restarted.verification_state(), VerificationState::Pending);
    assert!(restarted.invariant_violations().is_empty());
    let resynced = site.sync.mark_synced(&restarted).unwrap();
    assert_eq!(resynced.verification_state(), VerificationState::Pending);
    assert_eq!(resynced.verification_checksum(), None);

    assert_consistent(&site);
}

#[test]
fn capacity_floor_is_one() {
    let classes = vec!["class"; 10];
    assert_eq!(allocate(3, &classes, LEGACY_VERIFICATION_SCHEDULERS), 1);
}

#[test]
fn concurrent_claims_have_one_winner() {
    for _ in 0..50 {
        let site = site();
        let record = pending(&site, 1);
        let barrier = Arc::new(Barrier::new(2));

        let outcomes: Vec<ClaimOutcome> = thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let sync = Arc::clone(&site.sync);
                    let barrier = Arc::clone(&barrier);
                    let record = record.clone();
                    scope.spawn(move || {
                        barrier.wait();
                        sync.start_sync(&record).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners: Vec<_> = outcomes.iter().filter(|o| o.is_claimed()).collect();
        assert_eq!(winners.len(), 1);
        assert!(outcomes.contains(&ClaimOutcome::Conflict));

        let stored = site.sync.fetch(ResourceId::new(1)).unwrap();
        assert_eq!(stored.lock_version(), record.lock_version() + 1);
        assert_eq!(stored.state(), SyncState::Started);
    }
}

#[test]
fn abandoned_claims_are_recovered() {
    let site = site();
    pending(&site, 1);
    pending(&site, 2);
    let claimed = site.selector.claim_sync_batch(&site.sync, 10).unwrap();
    assert_eq!(claimed.len(), 2);

    // first worker finishes, second one dies
    site.sync.mark_synced(&claimed[0]).unwrap();
    assert!(site.selector.next_sync_batch(10).is_empty());

    site.clock.advance(Duration::from_secs(8 * 60 * 60 + 1));
    let recovered = site.selector.claim_sync_batch(&site.sync, 10).unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].resource_id(), ResourceId::new(2));
}

#[test]
fn journaled_store_restores_identical_records() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(5_000));
    let class = Arc::new(ReplicatorClass::new(
        "upload",
        ReplicationStrategy::Blob,
        Arc::new(MemoryChecksumProvider::new()),
    ));
    let config = GeoConfig::new().backoff(BackoffPolicy::deterministic());

    let before = {
        let store = RegistryStore::open(dir.path()).unwrap();
        let table = store.table("upload");
        let machine = SyncStateMachine::new(table.clone(), class.clone(), clock.clone(), config.clone());
        for id in 1..=3 {
            let record = table.ensure(ResourceId::new(id)).unwrap();
            let claimed = machine.start_sync(&record).unwrap().into_record().unwrap();
            if id == 2 {
                machine.mark_failed(&claimed, "disk full").unwrap();
            } else {
                machine.mark_synced(&claimed).unwrap();
            }
        }
        table.records()
    };

    let store = RegistryStore::open(dir.path()).unwrap();
    assert_eq!(store.table("upload").records(), before);

    let selector = BatchSelector::new(store.table("upload"), clock.clone(), config);
    clock.advance(Duration::from_secs(60));
    let due: Vec<_> = selector
        .next_sync_batch(10)
        .iter()
        .map(RegistryRecord::resource_id)
        .collect();
    assert_eq!(due, vec![ResourceId::new(2)]);
}
