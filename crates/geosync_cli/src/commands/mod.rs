//! CLI command implementations.

pub mod capacity;
pub mod compact;
pub mod events;
pub mod inspect;
pub mod reverify;
pub mod run;
pub mod status;

use geosync_core::{GeoConfig, MemoryChecksumProvider, RegistryStore, ReplicableRegistry};
use std::path::Path;
use std::sync::Arc;

/// Loads the configuration file, or the defaults without one.
pub fn load_config(path: Option<&Path>) -> Result<GeoConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {e}", path.display()))?;
            Ok(GeoConfig::from_json(&json)?)
        }
        None => Ok(GeoConfig::default()),
    }
}

/// Opens the registry, failing if the directory holds none.
pub fn open_existing_store(data_dir: &Path) -> Result<RegistryStore, Box<dyn std::error::Error>> {
    if !data_dir.join(geosync_core::store::JOURNAL_FILE_NAME).exists() {
        return Err(format!("No registry found at {}", data_dir.display()).into());
    }
    Ok(RegistryStore::open(data_dir)?)
}

/// Default classes for commands that never compare checksums.
pub fn offline_registry() -> Arc<ReplicableRegistry> {
    Arc::new(ReplicableRegistry::with_defaults(Arc::new(
        MemoryChecksumProvider::new(),
    )))
}
