//! Events command implementation.

use super::offline_registry;
use geosync_core::{GeoConfig, RegistryStore, SystemClock};
use geosync_engine::EventConsumer;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Runs the events command.
pub fn run(data_dir: &Path, config: &GeoConfig, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RegistryStore::open(data_dir)?);
    let consumer = EventConsumer::new(
        offline_registry(),
        store.clone(),
        Arc::new(SystemClock),
        config.clone(),
    );

    let report = if file == Path::new("-") {
        consumer.apply_json_lines(io::stdin().lock())?
    } else {
        consumer.apply_json_lines(BufReader::new(File::open(file)?))?
    };
    store.sync()?;

    println!("Events applied:");
    println!("  Created:             {}", report.created);
    println!("  Queued for resync:   {}", report.resynced);
    println!("  Removed:             {}", report.removed);
    println!("  Queued for verify:   {}", report.verification_queued);
    println!("  Skipped:             {}", report.skipped);

    Ok(())
}
