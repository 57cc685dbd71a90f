//! Capacity command implementation.

use geosync_core::{
    GeoConfig, MemoryChecksumProvider, ReplicableRegistry, ReplicationStrategy, ReplicatorClass,
    DEFAULT_REPLICATORS, LEGACY_VERIFICATION_SCHEDULERS,
};
use serde::Serialize;
use std::sync::Arc;

/// Concurrency budgets of the default registry.
#[derive(Debug, Serialize)]
pub struct CapacityReport {
    /// Classes with verification enabled.
    pub verification_enabled_classes: usize,
    /// Schedulers outside the registry sharing the verification budget.
    pub legacy_schedulers: usize,
    /// Verification jobs per class.
    pub verification_per_class: usize,
    /// Sync jobs per blob class.
    pub blob_sync_per_class: usize,
    /// Sync jobs per repository class.
    pub repository_sync_per_class: usize,
}

/// Runs the capacity command.
pub fn run(
    config: &GeoConfig,
    without_verification: &[String],
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    for name in without_verification {
        if !DEFAULT_REPLICATORS.iter().any(|(known, _)| known == name) {
            return Err(format!("Unknown replicator {name}").into());
        }
    }

    let checksums = Arc::new(MemoryChecksumProvider::new());
    let registry = ReplicableRegistry::new();
    for (name, strategy) in DEFAULT_REPLICATORS {
        let class = ReplicatorClass::new(*name, *strategy, checksums.clone());
        class.set_verification_enabled(!without_verification.iter().any(|n| n == name));
        registry.register(Arc::new(class))?;
    }

    let report = CapacityReport {
        verification_enabled_classes: registry.verification_enabled_classes().len(),
        legacy_schedulers: LEGACY_VERIFICATION_SCHEDULERS,
        verification_per_class: registry
            .verification_max_capacity_per_class(config.verification_max_capacity),
        blob_sync_per_class: registry.sync_max_capacity_per_class(
            ReplicationStrategy::Blob,
            config.blob_sync_max_capacity,
        ),
        repository_sync_per_class: registry.sync_max_capacity_per_class(
            ReplicationStrategy::Repository,
            config.repository_sync_max_capacity,
        ),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("Capacity:");
            println!(
                "  Verification:    {} per class (of {}, {} classes + {} legacy)",
                report.verification_per_class,
                config.verification_max_capacity,
                report.verification_enabled_classes,
                report.legacy_schedulers
            );
            println!(
                "  Blob sync:       {} per class (of {})",
                report.blob_sync_per_class, config.blob_sync_max_capacity
            );
            println!(
                "  Repository sync: {} per class (of {})",
                report.repository_sync_per_class, config.repository_sync_max_capacity
            );
        }
    }

    Ok(())
}
