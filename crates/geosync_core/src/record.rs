//! Registry records and their lifecycle states.
//!
//! A [`RegistryRecord`] tracks one replicable resource for one replicator
//! class. Its fields are readable by anyone but only writable from inside this
//! crate: every mutation goes through [`crate::SyncStateMachine`] or
//! [`crate::VerificationStateMachine`].

use crate::types::{Checksum, ResourceId, Timestamp};
use serde::{Deserialize, Serialize};

/// Sync lifecycle state.
///
/// The discriminants match the persisted enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SyncState {
    /// Never synced, or flagged for resync.
    Pending = 0,
    /// A worker has claimed the record and is transferring it.
    Started = 1,
    /// Content is present on the secondary.
    Synced = 2,
    /// The last attempt failed; retried once `retry_at` elapses.
    Failed = 3,
}

impl SyncState {
    /// Returns the persisted value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Converts a persisted value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Started),
            2 => Some(Self::Synced),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true if the record is waiting for a sync attempt.
    #[must_use]
    pub fn needs_sync(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// Verification lifecycle state.
///
/// The discriminants match the persisted enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VerificationState {
    /// Waiting for a checksum comparison.
    Pending = 0,
    /// A worker is computing the local checksum.
    Started = 1,
    /// Local checksum matched the primary.
    Verified = 2,
    /// Checksum could not be computed, or did not match.
    Failed = 3,
    /// Verification is turned off for this record's class.
    Disabled = 4,
}

impl VerificationState {
    /// Returns the persisted value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Converts a persisted value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Started),
            2 => Some(Self::Verified),
            3 => Some(Self::Failed),
            4 => Some(Self::Disabled),
            _ => None,
        }
    }

    /// Returns true if the record is waiting for a verification attempt.
    #[must_use]
    pub fn needs_verification(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// Replication and verification state of one resource on the secondary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub(crate) resource_id: ResourceId,
    pub(crate) state: SyncState,
    pub(crate) retry_count: u32,
    pub(crate) retry_at: Option<Timestamp>,
    pub(crate) last_synced_at: Option<Timestamp>,
    pub(crate) last_sync_failure: Option<String>,
    pub(crate) sync_started_at: Option<Timestamp>,
    pub(crate) verification_state: VerificationState,
    pub(crate) verification_retry_count: u32,
    pub(crate) verification_retry_at: Option<Timestamp>,
    pub(crate) verified_at: Option<Timestamp>,
    pub(crate) verification_started_at: Option<Timestamp>,
    pub(crate) verification_checksum: Option<Checksum>,
    pub(crate) verification_checksum_mismatched: Option<Checksum>,
    pub(crate) checksum_mismatch: bool,
    pub(crate) verification_failure: Option<String>,
    pub(crate) lock_version: u64,
}

impl RegistryRecord {
    /// Creates a record for a newly observed resource.
    #[must_use]
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            state: SyncState::Pending,
            retry_count: 0,
            retry_at: None,
            last_synced_at: None,
            last_sync_failure: None,
            sync_started_at: None,
            verification_state: VerificationState::Pending,
            verification_retry_count: 0,
            verification_retry_at: None,
            verified_at: None,
            verification_started_at: None,
            verification_checksum: None,
            verification_checksum_mismatched: None,
            checksum_mismatch: false,
            verification_failure: None,
            lock_version: 0,
        }
    }

    /// Returns the tracked resource.
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    /// Returns the sync state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Returns the number of consecutive sync failures.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns when the next sync retry becomes due.
    pub fn retry_at(&self) -> Option<Timestamp> {
        self.retry_at
    }

    /// Returns when the last successful sync finished.
    pub fn last_synced_at(&self) -> Option<Timestamp> {
        self.last_synced_at
    }

    /// Returns the last sync failure message.
    pub fn last_sync_failure(&self) -> Option<&str> {
        self.last_sync_failure.as_deref()
    }

    /// Returns when the current sync claim was taken.
    pub fn sync_started_at(&self) -> Option<Timestamp> {
        self.sync_started_at
    }

    /// Returns the verification state.
    pub fn verification_state(&self) -> VerificationState {
        self.verification_state
    }

    /// Returns the number of consecutive verification failures.
    pub fn verification_retry_count(&self) -> u32 {
        self.verification_retry_count
    }

    /// Returns when the next verification retry becomes due.
    pub fn verification_retry_at(&self) -> Option<Timestamp> {
        self.verification_retry_at
    }

    /// Returns when the record was last verified.
    pub fn verified_at(&self) -> Option<Timestamp> {
        self.verified_at
    }

    /// Returns when the current verification claim was taken.
    pub fn verification_started_at(&self) -> Option<Timestamp> {
        self.verification_started_at
    }

    /// Returns the locally computed checksum.
    pub fn verification_checksum(&self) -> Option<&Checksum> {
        self.verification_checksum.as_ref()
    }

    /// Returns the primary's checksum recorded on mismatch.
    pub fn verification_checksum_mismatched(&self) -> Option<&Checksum> {
        self.verification_checksum_mismatched.as_ref()
    }

    /// Returns true if the last verification found differing checksums.
    pub fn checksum_mismatch(&self) -> bool {
        self.checksum_mismatch
    }

    /// Returns the last verification failure message.
    pub fn verification_failure(&self) -> Option<&str> {
        self.verification_failure.as_deref()
    }

    /// Returns the optimistic-concurrency version.
    pub fn lock_version(&self) -> u64 {
        self.lock_version
    }

    /// Returns true if a sync attempt is due at `now`.
    pub fn sync_due(&self, now: Timestamp) -> bool {
        self.state.needs_sync() && self.retry_at.map_or(true, |at| at <= now)
    }

    /// Returns true if a verification attempt is due at `now`.
    pub fn verification_due(&self, now: Timestamp) -> bool {
        self.state == SyncState::Synced
            && self.verification_state.needs_verification()
            && self.verification_retry_at.map_or(true, |at| at <= now)
    }

    /// Returns true if the sync claim was taken before `cutoff`.
    pub fn sync_claim_stalled(&self, cutoff: Timestamp) -> bool {
        self.state == SyncState::Started && self.sync_started_at.map_or(true, |at| at < cutoff)
    }

    /// Returns true if the verification claim was taken before `cutoff`.
    pub fn verification_claim_stalled(&self, cutoff: Timestamp) -> bool {
        self.state == SyncState::Synced
            && self.verification_state == VerificationState::Started
            && self.verification_started_at.map_or(true, |at| at < cutoff)
    }

    /// Lists violated record invariants. Empty for a consistent record.
    pub fn invariant_violations(&self) -> Vec<&'static str> {
        let mut violations = Vec::new();

        if self.verification_state == VerificationState::Verified && self.state != SyncState::Synced {
            violations.push("verified record is not synced");
        }
        if self.verification_state == VerificationState::Started && self.state != SyncState::Synced {
            violations.push("verification started on unsynced record");
        }
        if self.checksum_mismatch {
            match (&self.verification_checksum, &self.verification_checksum_mismatched) {
                (Some(local), Some(primary)) if local != primary => {}
                _ => violations.push("checksum mismatch without two differing checksums"),
            }
        }
        if self.state == SyncState::Synced && self.retry_count != 0 {
            violations.push("synced record has a non-zero retry count");
        }
        if self.verification_state == VerificationState::Verified
            && self.verification_retry_count != 0
        {
            violations.push("verified record has a non-zero verification retry count");
        }

        violations
    }

    pub(crate) fn bump_version(&mut self) {
        self.lock_version = self.lock_version.wrapping_add(1);
    }

    pub(crate) fn clear_checksums(&mut self) {
        self.verification_checksum = None;
        self.verification_checksum_mismatched = None;
        self.checksum_mismatch = false;
    }
}
