//! Registry reconciliation against the primary's resource listing.
//!
//! Creates pending records for resources the secondary does not track yet and
//! removes records whose resource no longer exists on the primary.

use crate::error::EngineResult;
use crate::transport::ResourceFeed;
use geosync_core::{RegistryStore, ReplicableRegistry, ResourceId};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Changes made by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records created.
    pub created: usize,
    /// Records removed.
    pub removed: usize,
}

impl std::ops::AddAssign for ReconcileReport {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.removed += other.removed;
    }
}

/// Keeps the registry tables in line with the primary.
pub struct Reconciler {
    registry: Arc<ReplicableRegistry>,
    store: Arc<RegistryStore>,
    feed: Arc<dyn ResourceFeed>,
}

impl Reconciler {
    /// Creates a reconciler.
    pub fn new(
        registry: Arc<ReplicableRegistry>,
        store: Arc<RegistryStore>,
        feed: Arc<dyn ResourceFeed>,
    ) -> Self {
        Self {
            registry,
            store,
            feed,
        }
    }

    /// Reconciles every enabled class.
    pub fn reconcile(&self) -> EngineResult<ReconcileReport> {
        let mut total = ReconcileReport::default();
        for class in self.registry.enabled_classes() {
            total += self.reconcile_class(class.name())?;
        }
        if total != ReconcileReport::default() {
            tracing::info!(
                created = total.created,
                removed = total.removed,
                "registry reconciled"
            );
        }
        Ok(total)
    }

    /// Reconciles one class.
    pub fn reconcile_class(&self, replicator: &str) -> EngineResult<ReconcileReport> {
        let primary: BTreeSet<ResourceId> = self.feed.resource_ids(replicator)?.into_iter().collect();
        let table = self.store.table(replicator);
        let tracked: BTreeSet<ResourceId> = table.resource_ids().into_iter().collect();

        let mut report = ReconcileReport::default();
        for &resource_id in primary.difference(&tracked) {
            table.ensure(resource_id)?;
            report.created += 1;
        }
        for &resource_id in tracked.difference(&primary) {
            if table.remove(resource_id)?.is_some() {
                report.removed += 1;
            }
        }

        tracing::debug!(
            replicator,
            created = report.created,
            removed = report.removed,
            "class reconciled"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .finish()
    }
}
