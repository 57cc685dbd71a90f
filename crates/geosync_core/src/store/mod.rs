//! Registry storage.
//!
//! A [`RegistryStore`] owns one [`RegistryTable`] per replicator class. All
//! tables share a single optional [`Journal`]; on open the journal is
//! replayed to rebuild every table and its partial indexes.

mod dir;
mod index;
pub mod journal;
mod table;

pub use dir::{StoreDir, JOURNAL_FILE_NAME, LOCK_FILE_NAME};

pub use journal::{
    FileJournalBackend, Journal, JournalBackend, JournalEntry, MemoryJournalBackend,
};
pub use table::RegistryTable;
pub(crate) use table::Write;

use crate::error::CoreResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// The registry tables of every replicator class.
pub struct RegistryStore {
    tables: RwLock<HashMap<String, Arc<RegistryTable>>>,
    journal: Option<Arc<Journal>>,
}

impl RegistryStore {
    /// Creates a store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    /// Opens or creates a durable store in `dir`.
    ///
    /// The directory stays locked until the store and every table handed out
    /// by it are dropped.
    ///
    /// # Errors
    ///
    /// [`CoreError::StoreLocked`](crate::CoreError::StoreLocked) if another
    /// process or handle has the directory open.
    pub fn open(dir: &Path) -> CoreResult<Self> {
        let backend = FileJournalBackend::in_dir(StoreDir::open(dir)?)?;
        Self::with_backend(Box::new(backend))
    }

    /// Opens a store over an arbitrary journal backend and replays it.
    pub fn with_backend(backend: Box<dyn JournalBackend>) -> CoreResult<Self> {
        let (journal, entries) = Journal::open(backend, true)?;
        let store = Self {
            tables: RwLock::new(HashMap::new()),
            journal: Some(Arc::new(journal)),
        };

        let replayed = entries.len();
        for entry in entries {
            match entry {
                JournalEntry::Put { replicator, record } => store.table(&replicator).restore(record),
                JournalEntry::Delete {
                    replicator,
                    resource_id,
                } => store.table(&replicator).restore_remove(resource_id),
            }
        }

        tracing::info!(entries = replayed, tables = store.tables.read().len(), "registry store opened");
        Ok(store)
    }

    /// Returns the table for `replicator`, creating it if needed.
    pub fn table(&self, replicator: &str) -> Arc<RegistryTable> {
        if let Some(table) = self.tables.read().get(replicator) {
            return Arc::clone(table);
        }

        let mut tables = self.tables.write();
        Arc::clone(tables.entry(replicator.to_string()).or_insert_with(|| {
            Arc::new(RegistryTable::with_journal(replicator, self.journal.clone()))
        }))
    }

    /// Returns the table for `replicator` if it exists.
    pub fn existing_table(&self, replicator: &str) -> Option<Arc<RegistryTable>> {
        self.tables.read().get(replicator).cloned()
    }

    /// Returns the names of every table, sorted.
    pub fn replicators(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns true if the store is backed by a journal.
    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }

    /// Rewrites the journal as one `Put` per live record.
    ///
    /// Returns the number of entries written. A no-op for in-memory stores.
    pub fn compact(&self) -> CoreResult<usize> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };

        let _frozen = journal.freeze();
        let mut entries = Vec::new();
        for name in self.replicators() {
            if let Some(table) = self.existing_table(&name) {
                entries.extend(table.snapshot());
            }
        }
        journal.rewrite(&entries)?;

        tracing::info!(entries = entries.len(), "registry journal compacted");
        Ok(entries.len())
    }

    /// Flushes the journal.
    pub fn sync(&self) -> CoreResult<()> {
        match &self.journal {
            Some(journal) => journal.sync(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RegistryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryStore")
            .field("replicators", &self.replicators())
            .field("durable", &self.is_durable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SyncState;
    use crate::types::ResourceId;

    #[test]
    fn tables_are_created_once() {
        let store = RegistryStore::in_memory();
        let a = store.table("upload");
        let b = store.table("upload");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(store.existing_table("lfs_object").is_none());
        assert_eq!(store.replicators(), vec!["upload".to_string()]);
        assert_eq!(store.compact().unwrap(), 0);
    }

    #[test]
    fn replay_restores_records_and_indexes() {
        let backend = MemoryJournalBackend::new();
        {
            let store = RegistryStore::with_backend(Box::new(backend.clone())).unwrap();
            let table = store.table("upload");
            table.ensure(ResourceId::new(1)).unwrap();
            table.ensure(ResourceId::new(2)).unwrap();
            table
                .update(ResourceId::new(1), |r| {
                    r.state = SyncState::Synced;
                    Ok(())
                })
                .unwrap();
            store.table("lfs_object").ensure(ResourceId::new(7)).unwrap();
            store.table("lfs_object").remove(ResourceId::new(7)).unwrap();
        }

        let store = RegistryStore::with_backend(Box::new(backend)).unwrap();
        let table = store.table("upload");
        let record = table.fetch(ResourceId::new(1)).unwrap();
        assert_eq!(record.state(), SyncState::Synced);
        assert_eq!(record.lock_version(), 1);
        assert_eq!(table.sync_batch(0, 0, 10), vec![ResourceId::new(2)]);
        assert!(store.table("lfs_object").is_empty());
    }

    #[test]
    fn open_store_locks_its_directory() {
        let temp = tempfile::tempdir().unwrap();
        let store = RegistryStore::open(temp.path()).unwrap();
        store.table("upload").ensure(ResourceId::new(1)).unwrap();

        let second = RegistryStore::open(temp.path());
        assert!(matches!(second, Err(crate::CoreError::StoreLocked { .. })));

        // The lock holder keeps writing to the live journal.
        store.table("upload").ensure(ResourceId::new(2)).unwrap();
        store.sync().unwrap();
        drop(store);

        let reopened = RegistryStore::open(temp.path()).unwrap();
        assert_eq!(
            reopened.table("upload").resource_ids(),
            vec![ResourceId::new(1), ResourceId::new(2)]
        );
    }

    #[test]
    fn compaction_keeps_live_records_only() {
        let backend = MemoryJournalBackend::new();
        let store = RegistryStore::with_backend(Box::new(backend.clone())).unwrap();
        let table = store.table("upload");
        for id in 1..=3 {
            table.ensure(ResourceId::new(id)).unwrap();
        }
        table.remove(ResourceId::new(2)).unwrap();
        let before = backend.data().len();

        assert_eq!(store.compact().unwrap(), 2);
        assert!(backend.data().len() < before);

        let reopened = RegistryStore::with_backend(Box::new(backend)).unwrap();
        assert_eq!(
            reopened.table("upload").resource_ids(),
            vec![ResourceId::new(1), ResourceId::new(3)]
        );
    }
}
