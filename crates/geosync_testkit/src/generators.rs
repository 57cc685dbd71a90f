//! Property-based test generators using proptest.
//!
//! Provides strategies for random registry operation sequences and a driver
//! that applies them to a [`TestRegistry`].

use crate::fixtures::TestRegistry;
use geosync_core::{CoreError, CoreResult, ResourceId};
use proptest::prelude::*;
use std::time::Duration;

/// One step against a registry table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOp {
    /// Create the record if missing.
    Ensure(u64),
    /// Claim for sync.
    StartSync(u64),
    /// Record a successful sync.
    MarkSynced(u64),
    /// Record a failed sync.
    MarkFailed(u64),
    /// Queue another sync.
    Resync(u64),
    /// Claim for verification.
    StartVerification(u64),
    /// Verify with the primary's checksum.
    VerifyMatching(u64),
    /// Verify with a differing checksum.
    VerifyMismatching(u64),
    /// Record a verification that produced no checksum.
    MarkVerificationFailed(u64),
    /// Queue another verification.
    VerificationPending(u64),
    /// Turn verification off.
    DisableVerification(u64),
    /// Delete the record.
    Remove(u64),
    /// Move the clock forward.
    Advance(Duration),
    /// Fail timed-out verification claims.
    FailTimeouts,
    /// Reset old verifications.
    Reverify(usize),
}

impl RegistryOp {
    fn resource_id(&self) -> Option<ResourceId> {
        match *self {
            RegistryOp::Ensure(id)
            | RegistryOp::StartSync(id)
            | RegistryOp::MarkSynced(id)
            | RegistryOp::MarkFailed(id)
            | RegistryOp::Resync(id)
            | RegistryOp::StartVerification(id)
            | RegistryOp::VerifyMatching(id)
            | RegistryOp::VerifyMismatching(id)
            | RegistryOp::MarkVerificationFailed(id)
            | RegistryOp::VerificationPending(id)
            | RegistryOp::DisableVerification(id)
            | RegistryOp::Remove(id) => Some(ResourceId::new(id)),
            RegistryOp::Advance(_) | RegistryOp::FailTimeouts | RegistryOp::Reverify(_) => None,
        }
    }
}

/// Strategy for resource ids in `1..=max_id`.
pub fn resource_id_strategy(max_id: u64) -> impl Strategy<Value = u64> + Clone {
    1..=max_id
}

/// Strategy for clock steps, from a second to a few days.
pub fn clock_step_strategy() -> impl Strategy<Value = Duration> {
    prop_oneof![
        (1u64..120).prop_map(Duration::from_secs),
        (1u64..12).prop_map(|h| Duration::from_secs(h * 60 * 60)),
        (1u64..100).prop_map(|d| Duration::from_secs(d * 24 * 60 * 60)),
    ]
}

/// Strategy for a single operation on ids in `1..=max_id`.
pub fn registry_op_strategy(max_id: u64) -> impl Strategy<Value = RegistryOp> {
    let id = resource_id_strategy(max_id);
    prop_oneof![
        3 => id.clone().prop_map(RegistryOp::Ensure),
        3 => id.clone().prop_map(RegistryOp::StartSync),
        3 => id.clone().prop_map(RegistryOp::MarkSynced),
        1 => id.clone().prop_map(RegistryOp::MarkFailed),
        1 => id.clone().prop_map(RegistryOp::Resync),
        3 => id.clone().prop_map(RegistryOp::StartVerification),
        2 => id.clone().prop_map(RegistryOp::VerifyMatching),
        1 => id.clone().prop_map(RegistryOp::VerifyMismatching),
        1 => id.clone().prop_map(RegistryOp::MarkVerificationFailed),
        1 => id.clone().prop_map(RegistryOp::VerificationPending),
        1 => id.clone().prop_map(RegistryOp::DisableVerification),
        1 => id.prop_map(RegistryOp::Remove),
        1 => clock_step_strategy().prop_map(RegistryOp::Advance),
        1 => Just(RegistryOp::FailTimeouts),
        1 => (1usize..10).prop_map(RegistryOp::Reverify),
    ]
}

/// Strategy for operation sequences of up to `max_len` steps.
pub fn registry_ops_strategy(max_id: u64, max_len: usize) -> impl Strategy<Value = Vec<RegistryOp>> {
    prop::collection::vec(registry_op_strategy(max_id), 1..max_len)
}

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    /// The operation changed the registry or was a no-op by contract.
    Applied,
    /// A claim lost to a concurrent change.
    Conflict,
    /// The operation was refused as an invalid transition.
    Rejected,
    /// The record did not exist.
    Missing,
}

/// Applies `op` to `registry`.
///
/// Invalid transitions and missing records are expected outcomes of random
/// sequences; any other error is returned.
pub fn apply_op(registry: &TestRegistry, op: &RegistryOp) -> CoreResult<OpOutcome> {
    let record = match op.resource_id() {
        Some(id) if !matches!(op, RegistryOp::Ensure(_)) => match registry.table.get(id) {
            Some(record) => Some(record),
            None => return Ok(OpOutcome::Missing),
        },
        _ => None,
    };

    let result: CoreResult<OpOutcome> = match (op, record) {
        (RegistryOp::Ensure(id), _) => {
            registry.seed(*id);
            Ok(OpOutcome::Applied)
        }
        (RegistryOp::StartSync(_), Some(record)) => registry
            .sync
            .start_sync(&record)
            .map(|outcome| claim_outcome(outcome.is_claimed())),
        (RegistryOp::MarkSynced(_), Some(record)) => registry.sync.mark_synced(&record).map(|_| OpOutcome::Applied),
        (RegistryOp::MarkFailed(_), Some(record)) => registry
            .sync
            .mark_failed(&record, "connection reset")
            .map(|_| OpOutcome::Applied),
        (RegistryOp::Resync(_), Some(record)) => registry.sync.mark_for_resync(&record).map(|_| OpOutcome::Applied),
        (RegistryOp::StartVerification(_), Some(record)) => registry
            .verification
            .start_verification(&record)
            .map(|outcome| claim_outcome(outcome.is_claimed())),
        (RegistryOp::VerifyMatching(id), Some(record)) => registry
            .verification
            .mark_verified(&record, TestRegistry::primary_checksum(*id))
            .map(|_| OpOutcome::Applied),
        (RegistryOp::VerifyMismatching(id), Some(record)) => registry
            .verification
            .mark_verified(&record, TestRegistry::corrupt_checksum(*id))
            .map(|_| OpOutcome::Applied),
        (RegistryOp::MarkVerificationFailed(_), Some(record)) => registry
            .verification
            .mark_verification_failed(&record, "file unreadable")
            .map(|_| OpOutcome::Applied),
        (RegistryOp::VerificationPending(_), Some(record)) => registry
            .verification
            .mark_verification_pending(&record)
            .map(|_| OpOutcome::Applied),
        (RegistryOp::DisableVerification(_), Some(record)) => registry
            .verification
            .disable_verification(&record)
            .map(|_| OpOutcome::Applied),
        (RegistryOp::Remove(_), Some(record)) => registry
            .table
            .remove(record.resource_id())
            .map(|_| OpOutcome::Applied),
        (RegistryOp::Advance(step), _) => {
            registry.clock.advance(*step);
            Ok(OpOutcome::Applied)
        }
        (RegistryOp::FailTimeouts, _) => registry
            .verification
            .fail_verification_timeouts()
            .map(|_| OpOutcome::Applied),
        (RegistryOp::Reverify(limit), _) => registry
            .verification
            .reverify_batch(*limit)
            .map(|_| OpOutcome::Applied),
        (_, None) => Ok(OpOutcome::Missing),
    };

    match result {
        Err(e) if e.is_contract_violation() => Ok(OpOutcome::Rejected),
        Err(e) if e.is_superseded() => Ok(OpOutcome::Conflict),
        Err(CoreError::RecordNotFound { .. }) => Ok(OpOutcome::Missing),
        other => other,
    }
}

/// Applies every operation in order, stopping at the first unexpected error.
pub fn apply_ops(registry: &TestRegistry, ops: &[RegistryOp]) -> CoreResult<Vec<OpOutcome>> {
    ops.iter().map(|op| apply_op(registry, op)).collect()
}

fn claim_outcome(claimed: bool) -> OpOutcome {
    if claimed {
        OpOutcome::Applied
    } else {
        OpOutcome::Conflict
    }
}
