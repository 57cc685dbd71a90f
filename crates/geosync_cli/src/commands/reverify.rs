//! Reverify command implementation.

use super::{offline_registry, open_existing_store};
use geosync_core::{GeoConfig, ResourceId, SystemClock, VerificationStateMachine};
use std::path::Path;
use std::sync::Arc;

/// Runs the reverify command.
///
/// With an id, queues that record if it is synced; otherwise queues the
/// oldest verifications past the reverification interval.
pub fn run(
    data_dir: &Path,
    config: &GeoConfig,
    replicator: &str,
    id: Option<u64>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing_store(data_dir)?;
    let class = offline_registry().get(replicator)?;
    let machine = VerificationStateMachine::new(
        store.table(replicator),
        class,
        Arc::new(SystemClock),
        config.clone(),
    );

    match id {
        Some(id) => {
            let record = machine.fetch(ResourceId::new(id))?;
            match machine.mark_verification_pending(&record)? {
                Some(_) => println!("✓ {replicator} {id} queued for verification"),
                None => println!(
                    "{replicator} {id} not queued (sync {:?}, verification {:?})",
                    record.state(),
                    record.verification_state()
                ),
            }
        }
        None => {
            let limit = limit.unwrap_or(config.reverification_batch_size);
            let queued = machine.reverify_batch(limit)?;
            println!("✓ {queued} {replicator} record(s) queued for verification");
        }
    }

    store.sync()?;
    Ok(())
}
