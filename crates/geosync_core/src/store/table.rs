//! Per-class registry table.

use super::index::RegistryIndexes;
use super::journal::{Journal, JournalEntry};
use crate::error::{CoreError, CoreResult};
use crate::record::RegistryRecord;
use crate::status::ReplicationStatus;
use crate::types::{ResourceId, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// What a mutation closure decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Write {
    /// Persist the modified record.
    Commit,
    /// Leave the stored record untouched.
    Skip,
}

#[derive(Debug, Default)]
struct TableInner {
    records: HashMap<ResourceId, RegistryRecord>,
    indexes: RegistryIndexes,
}

/// Registry records of one replicator class, keyed by resource id.
///
/// Every write runs under the table's write lock as a read-check-write
/// sequence, so a conditional update observes the latest `lock_version` and
/// at most one claim succeeds per version.
pub struct RegistryTable {
    replicator: String,
    inner: RwLock<TableInner>,
    journal: Option<Arc<Journal>>,
}

impl RegistryTable {
    /// Creates an empty table that is not journaled.
    pub fn new(replicator: impl Into<String>) -> Self {
        Self::with_journal(replicator, None)
    }

    pub(crate) fn with_journal(replicator: impl Into<String>, journal: Option<Arc<Journal>>) -> Self {
        Self {
            replicator: replicator.into(),
            inner: RwLock::new(TableInner::default()),
            journal,
        }
    }

    /// Returns the replicator class name.
    pub fn replicator(&self) -> &str {
        &self.replicator
    }

    /// Returns a copy of the record for `resource_id`.
    pub fn get(&self, resource_id: ResourceId) -> Option<RegistryRecord> {
        self.inner.read().records.get(&resource_id).cloned()
    }

    /// Returns a copy of the record, or [`CoreError::RecordNotFound`].
    pub fn fetch(&self, resource_id: ResourceId) -> CoreResult<RegistryRecord> {
        self.get(resource_id).ok_or_else(|| self.not_found(resource_id))
    }

    /// Returns the record for `resource_id`, creating a pending one if absent.
    pub fn ensure(&self, resource_id: ResourceId) -> CoreResult<RegistryRecord> {
        let _admitted = self.journal.as_deref().map(Journal::admit);
        let mut inner = self.inner.write();
        if let Some(existing) = inner.records.get(&resource_id) {
            return Ok(existing.clone());
        }

        let record = RegistryRecord::new(resource_id);
        self.log(JournalEntry::Put {
            replicator: self.replicator.clone(),
            record: record.clone(),
        })?;
        inner.indexes.insert(&record);
        inner.records.insert(resource_id, record.clone());

        tracing::debug!(replicator = %self.replicator, resource_id = %resource_id, "registry record created");
        Ok(record)
    }

    /// Deletes the record, returning it if it existed.
    pub fn remove(&self, resource_id: ResourceId) -> CoreResult<Option<RegistryRecord>> {
        let _admitted = self.journal.as_deref().map(Journal::admit);
        let mut inner = self.inner.write();
        if !inner.records.contains_key(&resource_id) {
            return Ok(None);
        }

        self.log(JournalEntry::Delete {
            replicator: self.replicator.clone(),
            resource_id,
        })?;
        let removed = inner.records.remove(&resource_id);
        if let Some(record) = &removed {
            inner.indexes.remove(record);
        }

        tracing::debug!(replicator = %self.replicator, resource_id = %resource_id, "registry record removed");
        Ok(removed)
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Returns true if the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Returns every record ordered by resource id.
    pub fn records(&self) -> Vec<RegistryRecord> {
        let mut records: Vec<_> = self.inner.read().records.values().cloned().collect();
        records.sort_by_key(RegistryRecord::resource_id);
        records
    }

    /// Returns every resource id in ascending order.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self.inner.read().records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Counts records per state.
    pub fn status(&self) -> ReplicationStatus {
        let inner = self.inner.read();
        ReplicationStatus::from_records(&self.replicator, inner.records.values())
    }

    /// Applies `f` to a working copy of the stored record.
    ///
    /// On [`Write::Commit`] the copy gets a new `lock_version`, is journaled,
    /// and replaces the stored record; the new record is returned. On
    /// [`Write::Skip`] or an error nothing changes.
    pub(crate) fn mutate<F>(&self, resource_id: ResourceId, f: F) -> CoreResult<Option<RegistryRecord>>
    where
        F: FnOnce(&mut RegistryRecord) -> CoreResult<Write>,
    {
        let _admitted = self.journal.as_deref().map(Journal::admit);
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let stored = inner
            .records
            .get(&resource_id)
            .ok_or_else(|| self.not_found(resource_id))?;

        let mut updated = stored.clone();
        if f(&mut updated)? == Write::Skip {
            return Ok(None);
        }
        updated.bump_version();

        self.log(JournalEntry::Put {
            replicator: self.replicator.clone(),
            record: updated.clone(),
        })?;

        if let Some(previous) = inner.records.insert(resource_id, updated.clone()) {
            inner.indexes.update(&previous, &updated);
        }
        Ok(Some(updated))
    }

    /// Like [`Self::mutate`] for closures that always commit.
    pub(crate) fn update<F>(&self, resource_id: ResourceId, f: F) -> CoreResult<RegistryRecord>
    where
        F: FnOnce(&mut RegistryRecord) -> CoreResult<()>,
    {
        self.mutate(resource_id, |record| f(record).map(|()| Write::Commit))?
            .ok_or_else(|| self.not_found(resource_id))
    }

    /// Installs a record during journal replay.
    pub(crate) fn restore(&self, record: RegistryRecord) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if let Some(previous) = inner.records.get(&record.resource_id) {
            inner.indexes.remove(previous);
        }
        inner.indexes.insert(&record);
        inner.records.insert(record.resource_id, record);
    }

    /// Drops a record during journal replay.
    pub(crate) fn restore_remove(&self, resource_id: ResourceId) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.remove(&resource_id) {
            inner.indexes.remove(&record);
        }
    }

    /// Journal entries recreating the current contents.
    pub(crate) fn snapshot(&self) -> Vec<JournalEntry> {
        self.records()
            .into_iter()
            .map(|record| JournalEntry::Put {
                replicator: self.replicator.clone(),
                record,
            })
            .collect()
    }

    pub(crate) fn sync_batch(&self, now: Timestamp, stall_cutoff: Timestamp, limit: usize) -> Vec<ResourceId> {
        self.inner.read().indexes.sync_batch(now, stall_cutoff, limit)
    }

    pub(crate) fn verification_batch(
        &self,
        now: Timestamp,
        stall_cutoff: Timestamp,
        limit: usize,
    ) -> Vec<ResourceId> {
        self.inner
            .read()
            .indexes
            .verification_batch(now, stall_cutoff, limit)
    }

    pub(crate) fn verified_before(&self, cutoff: Timestamp, limit: usize) -> Vec<ResourceId> {
        self.inner.read().indexes.verified_before(cutoff, limit)
    }

    pub(crate) fn verification_started_before(&self, cutoff: Timestamp, limit: usize) -> Vec<ResourceId> {
        self.inner
            .read()
            .indexes
            .verification_started_before(cutoff, limit)
    }

    fn log(&self, entry: JournalEntry) -> CoreResult<()> {
        match &self.journal {
            Some(journal) => journal.append(&entry),
            None => Ok(()),
        }
    }

    fn not_found(&self, resource_id: ResourceId) -> CoreError {
        CoreError::RecordNotFound {
            replicator: self.replicator.clone(),
            resource_id,
        }
    }
}

impl std::fmt::Debug for RegistryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryTable")
            .field("replicator", &self.replicator)
            .field("records", &self.len())
            .field("journaled", &self.journal.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SyncState;

    #[test]
    fn ensure_is_find_or_create() {
        let table = RegistryTable::new("upload");
        let first = table.ensure(ResourceId::new(1)).unwrap();
        let second = table.ensure(ResourceId::new(1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn mutate_bumps_version_and_reindexes() {
        let table = RegistryTable::new("upload");
        table.ensure(ResourceId::new(1)).unwrap();
        assert_eq!(table.sync_batch(0, 0, 10), vec![ResourceId::new(1)]);

        let updated = table
            .update(ResourceId::new(1), |r| {
                r.state = SyncState::Synced;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.lock_version(), 1);
        assert!(table.sync_batch(0, 0, 10).is_empty());
        assert_eq!(table.verification_batch(0, 0, 10), vec![ResourceId::new(1)]);
    }

    #[test]
    fn skip_leaves_record_untouched() {
        let table = RegistryTable::new("upload");
        table.ensure(ResourceId::new(1)).unwrap();

        let result = table
            .mutate(ResourceId::new(1), |r| {
                r.state = SyncState::Synced;
                Ok(Write::Skip)
            })
            .unwrap();
        assert!(result.is_none());
        assert_eq!(table.fetch(ResourceId::new(1)).unwrap().state(), SyncState::Pending);
    }

    #[test]
    fn failed_closure_leaves_record_untouched() {
        let table = RegistryTable::new("upload");
        table.ensure(ResourceId::new(1)).unwrap();

        let result = table.update(ResourceId::new(1), |r| {
            r.state = SyncState::Synced;
            Err(CoreError::InvalidConfig("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(table.fetch(ResourceId::new(1)).unwrap().lock_version(), 0);
    }

    #[test]
    fn missing_record() {
        let table = RegistryTable::new("upload");
        assert!(matches!(
            table.fetch(ResourceId::new(9)),
            Err(CoreError::RecordNotFound { .. })
        ));
        assert!(table.remove(ResourceId::new(9)).unwrap().is_none());
    }

    #[test]
    fn remove_drops_index_entries() {
        let table = RegistryTable::new("upload");
        table.ensure(ResourceId::new(1)).unwrap();
        table.ensure(ResourceId::new(2)).unwrap();
        table.remove(ResourceId::new(1)).unwrap();

        assert_eq!(table.sync_batch(0, 0, 10), vec![ResourceId::new(2)]);
        assert_eq!(table.resource_ids(), vec![ResourceId::new(2)]);
    }
}
