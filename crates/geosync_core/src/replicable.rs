//! Replicator classes and the registry that enumerates them.
//!
//! Each resource type taking part in replication is a [`Replicable`]. The
//! [`ReplicableRegistry`] is injected into the schedulers instead of living in
//! a global, and its classes carry runtime toggles so replication or
//! verification can be switched off without a restart.

use crate::capacity::{allocate, LEGACY_VERIFICATION_SCHEDULERS};
use crate::error::{CoreError, CoreResult};
use crate::types::{Checksum, ResourceId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a replicator class moves its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationStrategy {
    /// Single-file content such as artifacts and uploads.
    Blob,
    /// Git or container repositories.
    Repository,
}

/// Supplies the checksum the primary recorded for a resource.
pub trait ChecksumProvider: Send + Sync {
    /// Returns the primary's checksum, or `None` if it has not checksummed
    /// the resource yet.
    fn primary_checksum(
        &self,
        replicator: &str,
        resource_id: ResourceId,
    ) -> CoreResult<Option<Checksum>>;
}

/// A resource type taking part in replication.
pub trait Replicable: Send + Sync {
    /// Stable name, also used as the registry table name.
    fn name(&self) -> &str;

    /// Blob or repository.
    fn strategy(&self) -> ReplicationStrategy;

    /// Whether replication is enabled for this class.
    fn is_enabled(&self) -> bool;

    /// Whether the verification feature is switched on for this class.
    fn verification_feature_enabled(&self) -> bool;

    /// Whether records of this class should be verified.
    ///
    /// A class that is not replicated is never verified.
    fn verification_enabled(&self) -> bool {
        self.is_enabled() && self.verification_feature_enabled()
    }

    /// Returns the primary's checksum for a resource of this class.
    fn primary_checksum(&self, resource_id: ResourceId) -> CoreResult<Option<Checksum>>;
}

/// Replicator classes known to a standard installation.
pub const DEFAULT_REPLICATORS: &[(&str, ReplicationStrategy)] = &[
    ("lfs_object", ReplicationStrategy::Blob),
    ("merge_request_diff", ReplicationStrategy::Blob),
    ("package_file", ReplicationStrategy::Blob),
    ("terraform_state_version", ReplicationStrategy::Blob),
    ("snippet_repository", ReplicationStrategy::Repository),
    ("group_wiki_repository", ReplicationStrategy::Repository),
    ("pipeline_artifact", ReplicationStrategy::Blob),
    ("pages_deployment", ReplicationStrategy::Blob),
    ("upload", ReplicationStrategy::Blob),
    ("job_artifact", ReplicationStrategy::Blob),
    ("ci_secure_file", ReplicationStrategy::Blob),
    ("container_repository", ReplicationStrategy::Repository),
    ("dependency_proxy_blob", ReplicationStrategy::Blob),
    ("dependency_proxy_manifest", ReplicationStrategy::Blob),
    ("project_wiki_repository", ReplicationStrategy::Repository),
];

/// A configurable replicator class backed by a [`ChecksumProvider`].
pub struct ReplicatorClass {
    name: String,
    strategy: ReplicationStrategy,
    enabled: AtomicBool,
    verification_enabled: AtomicBool,
    checksums: Arc<dyn ChecksumProvider>,
}

impl ReplicatorClass {
    /// Creates an enabled class with verification switched on.
    pub fn new(
        name: impl Into<String>,
        strategy: ReplicationStrategy,
        checksums: Arc<dyn ChecksumProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            strategy,
            enabled: AtomicBool::new(true),
            verification_enabled: AtomicBool::new(true),
            checksums,
        }
    }

    /// Toggles replication.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Toggles the verification feature.
    pub fn set_verification_enabled(&self, enabled: bool) {
        self.verification_enabled.store(enabled, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ReplicatorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatorClass")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("enabled", &self.is_enabled())
            .field("verification_enabled", &self.verification_feature_enabled())
            .finish()
    }
}

impl Replicable for ReplicatorClass {
    fn name(&self) -> &str {
        &self.name
    }

    fn strategy(&self) -> ReplicationStrategy {
        self.strategy
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn verification_feature_enabled(&self) -> bool {
        self.verification_enabled.load(Ordering::SeqCst)
    }

    fn primary_checksum(&self, resource_id: ResourceId) -> CoreResult<Option<Checksum>> {
        self.checksums.primary_checksum(&self.name, resource_id)
    }
}

/// An in-memory checksum provider for tests and simulations.
#[derive(Debug, Default)]
pub struct MemoryChecksumProvider {
    checksums: RwLock<HashMap<(String, ResourceId), Checksum>>,
}

impl MemoryChecksumProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the primary's checksum for a resource.
    pub fn set(&self, replicator: &str, resource_id: ResourceId, checksum: Checksum) {
        self.checksums
            .write()
            .insert((replicator.to_string(), resource_id), checksum);
    }

    /// Forgets the checksum for a resource.
    pub fn remove(&self, replicator: &str, resource_id: ResourceId) {
        self.checksums
            .write()
            .remove(&(replicator.to_string(), resource_id));
    }
}

impl ChecksumProvider for MemoryChecksumProvider {
    fn primary_checksum(
        &self,
        replicator: &str,
        resource_id: ResourceId,
    ) -> CoreResult<Option<Checksum>> {
        Ok(self
            .checksums
            .read()
            .get(&(replicator.to_string(), resource_id))
            .cloned())
    }
}

/// The set of replicator classes taking part in replication.
#[derive(Default)]
pub struct ReplicableRegistry {
    classes: RwLock<Vec<Arc<dyn Replicable>>>,
}

impl ReplicableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the [`DEFAULT_REPLICATORS`].
    pub fn with_defaults(checksums: Arc<dyn ChecksumProvider>) -> Self {
        let classes = DEFAULT_REPLICATORS
            .iter()
            .map(|(name, strategy)| {
                Arc::new(ReplicatorClass::new(*name, *strategy, Arc::clone(&checksums)))
                    as Arc<dyn Replicable>
            })
            .collect();
        Self {
            classes: RwLock::new(classes),
        }
    }

    /// Adds a class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateReplicator`] if the name is taken.
    pub fn register(&self, class: Arc<dyn Replicable>) -> CoreResult<()> {
        let mut classes = self.classes.write();
        if classes.iter().any(|c| c.name() == class.name()) {
            return Err(CoreError::DuplicateReplicator {
                name: class.name().to_string(),
            });
        }
        classes.push(class);
        Ok(())
    }

    /// Looks up a class by name.
    pub fn get(&self, name: &str) -> CoreResult<Arc<dyn Replicable>> {
        self.classes
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownReplicator {
                name: name.to_string(),
            })
    }

    /// Returns every registered class.
    pub fn classes(&self) -> Vec<Arc<dyn Replicable>> {
        self.classes.read().clone()
    }

    /// Returns the names of every registered class.
    pub fn names(&self) -> Vec<String> {
        self.classes
            .read()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Returns the classes with replication enabled.
    pub fn enabled_classes(&self) -> Vec<Arc<dyn Replicable>> {
        self.select(|c| c.is_enabled())
    }

    /// Returns the enabled blob classes.
    pub fn blob_classes(&self) -> Vec<Arc<dyn Replicable>> {
        self.select(|c| c.is_enabled() && c.strategy() == ReplicationStrategy::Blob)
    }

    /// Returns the enabled repository classes.
    pub fn repository_classes(&self) -> Vec<Arc<dyn Replicable>> {
        self.select(|c| c.is_enabled() && c.strategy() == ReplicationStrategy::Repository)
    }

    /// Returns the classes with verification enabled.
    pub fn verification_enabled_classes(&self) -> Vec<Arc<dyn Replicable>> {
        self.select(|c| c.verification_enabled())
    }

    /// Returns the maximum concurrent verification jobs per class.
    ///
    /// Re-reads the toggles on every call.
    pub fn verification_max_capacity_per_class(&self, total_capacity: usize) -> usize {
        allocate(
            total_capacity,
            &self.verification_enabled_classes(),
            LEGACY_VERIFICATION_SCHEDULERS,
        )
    }

    /// Returns the maximum concurrent sync jobs per class of `strategy`.
    pub fn sync_max_capacity_per_class(
        &self,
        strategy: ReplicationStrategy,
        total_capacity: usize,
    ) -> usize {
        let classes = match strategy {
            ReplicationStrategy::Blob => self.blob_classes(),
            ReplicationStrategy::Repository => self.repository_classes(),
        };
        allocate(total_capacity, &classes, 0)
    }

    fn select(&self, predicate: impl Fn(&dyn Replicable) -> bool) -> Vec<Arc<dyn Replicable>> {
        self.classes
            .read()
            .iter()
            .filter(|c| predicate(c.as_ref()))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ReplicableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicableRegistry")
            .field("classes", &self.names())
            .finish()
    }
}
