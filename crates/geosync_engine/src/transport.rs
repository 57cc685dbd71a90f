//! Collaborator traits for moving and checksumming resources.

use crate::error::{EngineError, EngineResult};
use geosync_core::{Checksum, ResourceId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Copies a resource from the primary to the secondary.
///
/// Implementations do the actual I/O; the engine only records the outcome.
pub trait Transfer: Send + Sync {
    /// Transfers one resource.
    fn transfer(&self, replicator: &str, resource_id: ResourceId) -> EngineResult<()>;
}

/// Computes the checksum of a resource's local copy.
pub trait LocalChecksummer: Send + Sync {
    /// Returns the digest of the secondary's copy.
    fn local_checksum(&self, replicator: &str, resource_id: ResourceId) -> EngineResult<Checksum>;
}

/// Lists the resources that exist on the primary.
pub trait ResourceFeed: Send + Sync {
    /// Returns every resource id of the class, in ascending order.
    fn resource_ids(&self, replicator: &str) -> EngineResult<Vec<ResourceId>>;
}

type Key = (String, ResourceId);

fn key(replicator: &str, resource_id: ResourceId) -> Key {
    (replicator.to_string(), resource_id)
}

/// A transfer that succeeds unless told to fail.
#[derive(Debug, Default)]
pub struct MockTransfer {
    failures: Mutex<HashMap<Key, String>>,
    transferred: Mutex<Vec<Key>>,
}

impl MockTransfer {
    /// Creates a transfer that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes transfers of a resource fail with `message`.
    pub fn fail(&self, replicator: &str, resource_id: ResourceId, message: impl Into<String>) {
        self.failures
            .lock()
            .insert(key(replicator, resource_id), message.into());
    }

    /// Lets transfers of a resource succeed again.
    pub fn heal(&self, replicator: &str, resource_id: ResourceId) {
        self.failures.lock().remove(&key(replicator, resource_id));
    }

    /// Returns the number of successful transfers.
    pub fn transfer_count(&self) -> usize {
        self.transferred.lock().len()
    }

    /// Returns how many times a resource was transferred successfully.
    pub fn transfers_of(&self, replicator: &str, resource_id: ResourceId) -> usize {
        let wanted = key(replicator, resource_id);
        self.transferred
            .lock()
            .iter()
            .filter(|k| **k == wanted)
            .count()
    }
}

impl Transfer for MockTransfer {
    fn transfer(&self, replicator: &str, resource_id: ResourceId) -> EngineResult<()> {
        if let Some(message) = self.failures.lock().get(&key(replicator, resource_id)) {
            return Err(EngineError::transfer_retryable(message.clone()));
        }
        self.transferred.lock().push(key(replicator, resource_id));
        Ok(())
    }
}

/// A checksummer backed by a map.
#[derive(Debug, Default)]
pub struct MockChecksummer {
    checksums: Mutex<HashMap<Key, Checksum>>,
}

impl MockChecksummer {
    /// Creates an empty checksummer; every lookup fails until set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local checksum of a resource.
    pub fn set(&self, replicator: &str, resource_id: ResourceId, checksum: Checksum) {
        self.checksums
            .lock()
            .insert(key(replicator, resource_id), checksum);
    }
}

impl LocalChecksummer for MockChecksummer {
    fn local_checksum(&self, replicator: &str, resource_id: ResourceId) -> EngineResult<Checksum> {
        self.checksums
            .lock()
            .get(&key(replicator, resource_id))
            .cloned()
            .ok_or_else(|| EngineError::ResourceMissing {
                replicator: replicator.to_string(),
                resource_id,
            })
    }
}

/// A resource feed backed by in-memory sets.
#[derive(Debug, Default)]
pub struct MockResourceFeed {
    resources: Mutex<HashMap<String, BTreeSet<ResourceId>>>,
    unavailable: Mutex<HashSet<String>>,
}

impl MockResourceFeed {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds resources to a class.
    pub fn add(&self, replicator: &str, ids: impl IntoIterator<Item = u64>) {
        self.resources
            .lock()
            .entry(replicator.to_string())
            .or_default()
            .extend(ids.into_iter().map(ResourceId::new));
    }

    /// Removes a resource from a class.
    pub fn remove(&self, replicator: &str, resource_id: ResourceId) {
        if let Some(ids) = self.resources.lock().get_mut(replicator) {
            ids.remove(&resource_id);
        }
    }

    /// Makes listing a class fail.
    pub fn set_unavailable(&self, replicator: &str) {
        self.unavailable.lock().insert(replicator.to_string());
    }
}

impl ResourceFeed for MockResourceFeed {
    fn resource_ids(&self, replicator: &str) -> EngineResult<Vec<ResourceId>> {
        if self.unavailable.lock().contains(replicator) {
            return Err(EngineError::transfer_retryable(format!(
                "{replicator} listing unavailable"
            )));
        }
        Ok(self
            .resources
            .lock()
            .get(replicator)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }
}
