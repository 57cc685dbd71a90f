//! Status command implementation.

use super::open_existing_store;
use geosync_core::ReplicationStatus;
use std::path::Path;

/// Runs the status command.
pub fn run(
    data_dir: &Path,
    replicator: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing_store(data_dir)?;

    let statuses: Vec<ReplicationStatus> = match replicator {
        Some(name) => {
            let table = store
                .existing_table(name)
                .ok_or_else(|| format!("No records for replicator {name}"))?;
            vec![table.status()]
        }
        None => store
            .replicators()
            .iter()
            .filter_map(|name| store.existing_table(name))
            .map(|table| table.status())
            .collect(),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        _ => print_text_output(&statuses),
    }

    Ok(())
}

fn print_text_output(statuses: &[ReplicationStatus]) {
    if statuses.is_empty() {
        println!("No replicator classes tracked yet");
        return;
    }

    println!(
        "{:<28} {:>8} {:>8} {:>8} {:>8} {:>8} {:>9}",
        "Replicator", "Total", "Synced", "Failed", "Verified", "Failed", "Mismatch"
    );
    for status in statuses {
        println!(
            "{:<28} {:>8} {:>8} {:>8} {:>8} {:>8} {:>9}",
            status.replicator,
            status.total,
            status.synced,
            status.sync_failed,
            status.verified,
            status.verification_failed,
            status.checksum_mismatches,
        );
    }

    println!();
    for status in statuses {
        if let (Some(synced), Some(verified)) =
            (status.synced_percentage(), status.verified_percentage())
        {
            println!(
                "  {}: {:.1}% synced, {:.1}% verified",
                status.replicator, synced, verified
            );
        }
    }
}
