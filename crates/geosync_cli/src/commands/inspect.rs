//! Inspect command implementation.

use super::open_existing_store;
use geosync_core::{RegistryRecord, ResourceId, Timestamp};
use serde::Serialize;
use std::path::Path;

/// A registry record as shown to operators.
#[derive(Debug, Serialize)]
pub struct RecordView {
    /// Replicator class.
    pub replicator: String,
    /// Resource id.
    pub resource_id: u64,
    /// Sync state.
    pub state: String,
    /// Failed sync attempts since the last success.
    pub retry_count: u32,
    /// Next sync attempt, in milliseconds since the epoch.
    pub retry_at: Option<Timestamp>,
    /// Last successful sync.
    pub last_synced_at: Option<Timestamp>,
    /// Last sync error.
    pub last_sync_failure: Option<String>,
    /// Verification state.
    pub verification_state: String,
    /// Failed verification attempts since the last success.
    pub verification_retry_count: u32,
    /// Next verification attempt.
    pub verification_retry_at: Option<Timestamp>,
    /// Last successful verification.
    pub verified_at: Option<Timestamp>,
    /// Local checksum, hex encoded.
    pub verification_checksum: Option<String>,
    /// Primary checksum that differed, hex encoded.
    pub verification_checksum_mismatched: Option<String>,
    /// Whether the last verification found differing checksums.
    pub checksum_mismatch: bool,
    /// Last verification error.
    pub verification_failure: Option<String>,
    /// Optimistic lock version.
    pub lock_version: u64,
}

impl RecordView {
    fn new(replicator: &str, record: &RegistryRecord) -> Self {
        Self {
            replicator: replicator.to_string(),
            resource_id: record.resource_id().as_u64(),
            state: format!("{:?}", record.state()).to_lowercase(),
            retry_count: record.retry_count(),
            retry_at: record.retry_at(),
            last_synced_at: record.last_synced_at(),
            last_sync_failure: record.last_sync_failure().map(str::to_string),
            verification_state: format!("{:?}", record.verification_state()).to_lowercase(),
            verification_retry_count: record.verification_retry_count(),
            verification_retry_at: record.verification_retry_at(),
            verified_at: record.verified_at(),
            verification_checksum: record.verification_checksum().map(|c| c.to_hex()),
            verification_checksum_mismatched: record
                .verification_checksum_mismatched()
                .map(|c| c.to_hex()),
            checksum_mismatch: record.checksum_mismatch(),
            verification_failure: record.verification_failure().map(str::to_string),
            lock_version: record.lock_version(),
        }
    }
}

/// Runs the inspect command.
pub fn run(
    data_dir: &Path,
    replicator: &str,
    id: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing_store(data_dir)?;
    let table = store
        .existing_table(replicator)
        .ok_or_else(|| format!("No records for replicator {replicator}"))?;
    let record = table.fetch(ResourceId::new(id))?;
    let view = RecordView::new(replicator, &record);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        _ => print_text_output(&view),
    }

    let violations = record.invariant_violations();
    if !violations.is_empty() {
        for violation in &violations {
            println!("  ✗ {violation}");
        }
        return Err(format!("Record violates {} invariant(s)", violations.len()).into());
    }

    Ok(())
}

fn print_text_output(view: &RecordView) {
    fn opt<T: std::fmt::Display>(value: &Option<T>) -> String {
        value
            .as_ref()
            .map_or_else(|| "-".to_string(), |v| v.to_string())
    }

    println!("{} {}", view.replicator, view.resource_id);
    println!("  Sync:");
    println!("    State:        {}", view.state);
    println!("    Retries:      {}", view.retry_count);
    println!("    Retry at:     {}", opt(&view.retry_at));
    println!("    Last synced:  {}", opt(&view.last_synced_at));
    println!("    Last failure: {}", opt(&view.last_sync_failure));
    println!("  Verification:");
    println!("    State:        {}", view.verification_state);
    println!("    Retries:      {}", view.verification_retry_count);
    println!("    Retry at:     {}", opt(&view.verification_retry_at));
    println!("    Verified at:  {}", opt(&view.verified_at));
    println!("    Checksum:     {}", opt(&view.verification_checksum));
    if view.checksum_mismatch {
        println!("    Primary:      {}", opt(&view.verification_checksum_mismatched));
        println!("    ✗ checksum mismatch");
    }
    println!("    Last failure: {}", opt(&view.verification_failure));
    println!("  Lock version:   {}", view.lock_version);
}
