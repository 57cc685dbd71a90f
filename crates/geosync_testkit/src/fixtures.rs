//! Test fixtures for registry tables and state machines.
//!
//! A [`TestRegistry`] wires one replicator class, its table, a manual clock
//! and both state machines together.

use geosync_core::{
    BackoffPolicy, BatchSelector, Checksum, GeoConfig, ManualClock, MemoryChecksumProvider,
    RegistryRecord, RegistryStore, RegistryTable, ReplicationStrategy, ReplicatorClass,
    ResourceId, SyncStateMachine, VerificationStateMachine,
};
use geosync_core::store::{MemoryJournalBackend, JOURNAL_FILE_NAME};
use std::sync::Arc;
use tempfile::TempDir;

/// Replicator class used by the fixtures.
pub const TEST_REPLICATOR: &str = "upload";

/// Start time of the fixture clock, in milliseconds.
pub const TEST_EPOCH: u64 = 1_700_000_000_000;

/// A single-class registry with manual time.
pub struct TestRegistry {
    /// The store holding the class's table.
    pub store: Arc<RegistryStore>,
    /// The class's table.
    pub table: Arc<RegistryTable>,
    /// Manual clock shared by everything.
    pub clock: Arc<ManualClock>,
    /// Primary checksums.
    pub checksums: Arc<MemoryChecksumProvider>,
    /// The replicator class.
    pub class: Arc<ReplicatorClass>,
    /// Configuration in use.
    pub config: GeoConfig,
    /// Sync lifecycle.
    pub sync: Arc<SyncStateMachine>,
    /// Verification lifecycle.
    pub verification: Arc<VerificationStateMachine>,
    /// Batch selection.
    pub selector: Arc<BatchSelector>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestRegistry {
    /// Creates an in-memory registry with deterministic backoff.
    pub fn memory() -> Self {
        Self::build(
            RegistryStore::in_memory(),
            None,
            GeoConfig::new().backoff(BackoffPolicy::deterministic()),
        )
    }

    /// Creates a journaled registry in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = RegistryStore::open(temp_dir.path()).expect("Failed to open registry store");
        Self::build(
            store,
            Some(temp_dir),
            GeoConfig::new().backoff(BackoffPolicy::deterministic()),
        )
    }

    /// Creates an in-memory registry with `config`.
    pub fn with_config(config: GeoConfig) -> Self {
        Self::build(RegistryStore::in_memory(), None, config)
    }

    fn build(store: RegistryStore, temp_dir: Option<TempDir>, config: GeoConfig) -> Self {
        let store = Arc::new(store);
        let table = store.table(TEST_REPLICATOR);
        let clock = Arc::new(ManualClock::new(TEST_EPOCH));
        let checksums = Arc::new(MemoryChecksumProvider::new());
        let class = Arc::new(ReplicatorClass::new(
            TEST_REPLICATOR,
            ReplicationStrategy::Blob,
            checksums.clone(),
        ));

        Self {
            sync: Arc::new(SyncStateMachine::new(
                table.clone(),
                class.clone(),
                clock.clone(),
                config.clone(),
            )),
            verification: Arc::new(VerificationStateMachine::new(
                table.clone(),
                class.clone(),
                clock.clone(),
                config.clone(),
            )),
            selector: Arc::new(BatchSelector::new(
                table.clone(),
                clock.clone(),
                config.clone(),
            )),
            store,
            table,
            clock,
            checksums,
            class,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Replays a copy of the journal file, returning the records it holds.
    ///
    /// The live store keeps its directory locked, so the copy is replayed
    /// through a memory backend.
    ///
    /// # Panics
    ///
    /// Panics for an in-memory registry.
    pub fn replayed_records(&self) -> Vec<RegistryRecord> {
        let dir = self
            ._temp_dir
            .as_ref()
            .expect("replay needs a file registry");
        self.store.sync().expect("Failed to sync registry store");
        let bytes = std::fs::read(dir.path().join(JOURNAL_FILE_NAME)).expect("Failed to read journal");
        RegistryStore::with_backend(Box::new(MemoryJournalBackend::with_data(bytes)))
            .expect("Failed to replay journal")
            .table(TEST_REPLICATOR)
            .records()
    }

    /// The checksum the primary reports for `id`.
    pub fn primary_checksum(id: u64) -> Checksum {
        Checksum::from_bytes(id.to_be_bytes().to_vec())
    }

    /// A checksum that never matches [`Self::primary_checksum`].
    pub fn corrupt_checksum(id: u64) -> Checksum {
        let mut bytes = id.to_be_bytes().to_vec();
        bytes.push(0xff);
        Checksum::from_bytes(bytes)
    }

    /// Creates a pending record whose primary checksum is known.
    pub fn seed(&self, id: u64) -> RegistryRecord {
        let resource_id = ResourceId::new(id);
        self.checksums
            .set(TEST_REPLICATOR, resource_id, Self::primary_checksum(id));
        self.table.ensure(resource_id).expect("Failed to create record")
    }

    /// Creates a record and syncs it.
    pub fn synced(&self, id: u64) -> RegistryRecord {
        let record = self.seed(id);
        let claimed = self
            .sync
            .start_sync(&record)
            .expect("Failed to start sync")
            .into_record()
            .expect("Sync claim conflicted");
        self.sync.mark_synced(&claimed).expect("Failed to mark synced")
    }

    /// Creates a record, syncs it and verifies it.
    pub fn verified(&self, id: u64) -> RegistryRecord {
        let record = self.synced(id);
        let claimed = self
            .verification
            .start_verification(&record)
            .expect("Failed to start verification")
            .into_record()
            .expect("Verification claim conflicted");
        self.verification
            .mark_verified(&claimed, Self::primary_checksum(id))
            .expect("Failed to mark verified")
    }
}

impl std::fmt::Debug for TestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRegistry")
            .field("records", &self.table.len())
            .field("durable", &self.store.is_durable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosync_core::{SyncState, VerificationState};

    #[test]
    fn helpers_reach_their_states() {
        let registry = TestRegistry::memory();
        assert_eq!(registry.seed(1).state(), SyncState::Pending);
        assert_eq!(registry.synced(2).state(), SyncState::Synced);
        assert_eq!(
            registry.verified(3).verification_state(),
            VerificationState::Verified
        );
    }

    #[test]
    fn checksums_differ() {
        for id in [0, 1, u64::MAX] {
            assert_ne!(
                TestRegistry::primary_checksum(id),
                TestRegistry::corrupt_checksum(id)
            );
        }
    }

    #[test]
    fn file_registry_replays() {
        let registry = TestRegistry::file();
        registry.verified(1);
        assert_eq!(registry.replayed_records(), registry.table.records());
    }
}
