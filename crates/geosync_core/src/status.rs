//! Per-class replication counters.

use crate::record::{RegistryRecord, SyncState, VerificationState};
use serde::Serialize;

/// Record counts of one replicator class, by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStatus {
    /// Replicator class name.
    pub replicator: String,
    /// Total registry records.
    pub total: usize,
    /// Records waiting for their first sync or a resync.
    pub sync_pending: usize,
    /// Records currently claimed for sync.
    pub sync_started: usize,
    /// Records present on the secondary.
    pub synced: usize,
    /// Records whose last sync failed.
    pub sync_failed: usize,
    /// Records waiting for verification.
    pub verification_pending: usize,
    /// Records currently claimed for verification.
    pub verification_started: usize,
    /// Records whose checksum matched the primary.
    pub verified: usize,
    /// Records whose verification failed.
    pub verification_failed: usize,
    /// Records with verification turned off.
    pub verification_disabled: usize,
    /// Failed records whose checksums differed.
    pub checksum_mismatches: usize,
}

impl ReplicationStatus {
    /// Tallies `records`.
    pub fn from_records<'a>(
        replicator: &str,
        records: impl IntoIterator<Item = &'a RegistryRecord>,
    ) -> Self {
        let mut status = Self {
            replicator: replicator.to_string(),
            ..Self::default()
        };

        for record in records {
            status.total += 1;
            match record.state() {
                SyncState::Pending => status.sync_pending += 1,
                SyncState::Started => status.sync_started += 1,
                SyncState::Synced => status.synced += 1,
                SyncState::Failed => status.sync_failed += 1,
            }
            match record.verification_state() {
                VerificationState::Pending => status.verification_pending += 1,
                VerificationState::Started => status.verification_started += 1,
                VerificationState::Verified => status.verified += 1,
                VerificationState::Failed => status.verification_failed += 1,
                VerificationState::Disabled => status.verification_disabled += 1,
            }
            if record.checksum_mismatch() {
                status.checksum_mismatches += 1;
            }
        }

        status
    }

    /// Percentage of records synced, or `None` for an empty class.
    pub fn synced_percentage(&self) -> Option<f64> {
        percentage(self.synced, self.total)
    }

    /// Percentage of records verified, or `None` for an empty class.
    pub fn verified_percentage(&self) -> Option<f64> {
        percentage(self.verified, self.total)
    }
}

fn percentage(part: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| part as f64 * 100.0 / total as f64)
}
