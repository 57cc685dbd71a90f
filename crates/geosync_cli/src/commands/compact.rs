//! Compact command implementation.

use super::open_existing_store;
use geosync_core::store::JOURNAL_FILE_NAME;
use std::path::Path;

/// Runs the compact command.
pub fn run(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let journal_path = data_dir.join(JOURNAL_FILE_NAME);
    let store = open_existing_store(data_dir)?;
    let bytes_before = std::fs::metadata(&journal_path)?.len();

    println!("Compacting registry journal at {}", journal_path.display());
    let entries = store.compact()?;
    let bytes_after = std::fs::metadata(&journal_path)?.len();

    println!("  Records kept: {entries}");
    println!("  Size before:  {bytes_before} bytes");
    println!("  Size after:   {bytes_after} bytes");
    println!(
        "  Space saved:  {} bytes ({:.1}%)",
        bytes_before.saturating_sub(bytes_after),
        if bytes_before > 0 {
            (bytes_before.saturating_sub(bytes_after) as f64 / bytes_before as f64) * 100.0
        } else {
            0.0
        }
    );
    println!("✓ Compaction complete");

    Ok(())
}
