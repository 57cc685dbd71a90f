//! Partial indexes over a registry table.
//!
//! Each index holds only the rows matching one state predicate, ordered by
//! the timestamp the matching query sorts on. `Option<Timestamp>` sorts
//! `None` first, which gives the nulls-first ordering the batch queries need
//! without a separate pass.
//!
//! | index | rows | key |
//! |---|---|---|
//! | `sync_due` | `state ∈ {pending, failed}` | `(retry_at, id)` |
//! | `sync_started` | `state = started` | `(sync_started_at, id)` |
//! | `verification_due` | `state = synced ∧ verification_state ∈ {pending, failed}` | `(verification_retry_at, id)` |
//! | `verification_started` | `state = synced ∧ verification_state = started` | `(verification_started_at, id)` |
//! | `verified` | `verification_state = verified` | `(verified_at, id)` |

use crate::record::{RegistryRecord, SyncState, VerificationState};
use crate::types::{ResourceId, Timestamp};
use std::collections::BTreeSet;

type DueKey = (Option<Timestamp>, ResourceId);
type AgeKey = (Timestamp, ResourceId);

/// Index keys a single record contributes.
#[derive(Debug, Default, PartialEq, Eq)]
struct IndexKeys {
    sync_due: Option<DueKey>,
    sync_started: Option<AgeKey>,
    verification_due: Option<DueKey>,
    verification_started: Option<AgeKey>,
    verified: Option<AgeKey>,
}

impl IndexKeys {
    fn of(record: &RegistryRecord) -> Self {
        let id = record.resource_id;
        let synced = record.state == SyncState::Synced;

        Self {
            sync_due: record.state.needs_sync().then_some((record.retry_at, id)),
            sync_started: (record.state == SyncState::Started)
                .then(|| (record.sync_started_at.unwrap_or(0), id)),
            verification_due: (synced && record.verification_state.needs_verification())
                .then_some((record.verification_retry_at, id)),
            verification_started: (synced
                && record.verification_state == VerificationState::Started)
                .then(|| (record.verification_started_at.unwrap_or(0), id)),
            verified: (record.verification_state == VerificationState::Verified)
                .then(|| (record.verified_at.unwrap_or(0), id)),
        }
    }
}

/// The set of partial indexes for one table.
#[derive(Debug, Default)]
pub(crate) struct RegistryIndexes {
    sync_due: BTreeSet<DueKey>,
    sync_started: BTreeSet<AgeKey>,
    verification_due: BTreeSet<DueKey>,
    verification_started: BTreeSet<AgeKey>,
    verified: BTreeSet<AgeKey>,
}

impl RegistryIndexes {
    /// Adds a record's keys.
    pub fn insert(&mut self, record: &RegistryRecord) {
        let keys = IndexKeys::of(record);
        if let Some(key) = keys.sync_due {
            self.sync_due.insert(key);
        }
        if let Some(key) = keys.sync_started {
            self.sync_started.insert(key);
        }
        if let Some(key) = keys.verification_due {
            self.verification_due.insert(key);
        }
        if let Some(key) = keys.verification_started {
            self.verification_started.insert(key);
        }
        if let Some(key) = keys.verified {
            self.verified.insert(key);
        }
    }

    /// Drops a record's keys.
    pub fn remove(&mut self, record: &RegistryRecord) {
        let keys = IndexKeys::of(record);
        if let Some(key) = keys.sync_due {
            self.sync_due.remove(&key);
        }
        if let Some(key) = keys.sync_started {
            self.sync_started.remove(&key);
        }
        if let Some(key) = keys.verification_due {
            self.verification_due.remove(&key);
        }
        if let Some(key) = keys.verification_started {
            self.verification_started.remove(&key);
        }
        if let Some(key) = keys.verified {
            self.verified.remove(&key);
        }
    }

    /// Replaces `old`'s keys with `new`'s.
    pub fn update(&mut self, old: &RegistryRecord, new: &RegistryRecord) {
        if IndexKeys::of(old) != IndexKeys::of(new) {
            self.remove(old);
            self.insert(new);
        }
    }

    /// Records due for sync, plus sync claims taken before `stall_cutoff`.
    pub fn sync_batch(&self, now: Timestamp, stall_cutoff: Timestamp, limit: usize) -> Vec<ResourceId> {
        select_due(&self.sync_due, &self.sync_started, now, stall_cutoff, limit)
    }

    /// Records due for verification, plus verification claims taken before
    /// `stall_cutoff`.
    pub fn verification_batch(
        &self,
        now: Timestamp,
        stall_cutoff: Timestamp,
        limit: usize,
    ) -> Vec<ResourceId> {
        select_due(
            &self.verification_due,
            &self.verification_started,
            now,
            stall_cutoff,
            limit,
        )
    }

    /// Verified records whose `verified_at` is before `cutoff`, oldest first.
    pub fn verified_before(&self, cutoff: Timestamp, limit: usize) -> Vec<ResourceId> {
        older_than(&self.verified, cutoff, limit)
    }

    /// Verification claims taken before `cutoff`, oldest first.
    pub fn verification_started_before(&self, cutoff: Timestamp, limit: usize) -> Vec<ResourceId> {
        older_than(&self.verification_started, cutoff, limit)
    }
}

fn older_than(index: &BTreeSet<AgeKey>, cutoff: Timestamp, limit: usize) -> Vec<ResourceId> {
    index
        .range(..(cutoff, ResourceId::MIN))
        .take(limit)
        .map(|(_, id)| *id)
        .collect()
}

/// Null-timestamp rows and stalled claims first (by id), then rows whose
/// timestamp has elapsed (by timestamp).
fn select_due(
    due: &BTreeSet<DueKey>,
    started: &BTreeSet<AgeKey>,
    now: Timestamp,
    stall_cutoff: Timestamp,
    limit: usize,
) -> Vec<ResourceId> {
    if limit == 0 {
        return Vec::new();
    }

    let never_failed = due
        .range(..(Some(0), ResourceId::MIN))
        .take(limit)
        .map(|(_, id)| *id);
    let stalled = older_than(started, stall_cutoff, limit);

    let mut batch: Vec<ResourceId> = never_failed.chain(stalled).collect();
    batch.sort_unstable();
    batch.truncate(limit);

    let remaining = limit - batch.len();
    if remaining > 0 {
        batch.extend(
            due.range((Some(0), ResourceId::MIN)..=(Some(now), ResourceId::MAX))
                .take(remaining)
                .map(|(_, id)| *id),
        );
    }

    batch
}
