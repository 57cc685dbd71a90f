//! Sync and verification workers.
//!
//! A worker claims a batch through the [`BatchSelector`], does the I/O for
//! each claimed record outside any registry lock, and records the outcome
//! through its state machine. Several workers may run against the same class
//! concurrently; claims guarantee they never process the same record at once.

use crate::error::{EngineError, EngineResult};
use crate::transport::{LocalChecksummer, Transfer};
use geosync_core::{
    BatchSelector, CoreError, RegistryRecord, SyncStateMachine, VerificationState,
    VerificationStateMachine,
};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome counts of worker runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Batches processed.
    pub batches: usize,
    /// Records claimed.
    pub claimed: usize,
    /// Records synced or verified.
    pub succeeded: usize,
    /// Records whose attempt failed.
    pub failed: usize,
    /// Verifications that found differing checksums.
    pub mismatched: usize,
    /// Records that changed or vanished while being processed.
    pub lost: usize,
}

impl AddAssign for WorkerReport {
    fn add_assign(&mut self, other: Self) {
        self.batches += other.batches;
        self.claimed += other.claimed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.mismatched += other.mismatched;
        self.lost += other.lost;
    }
}

/// Outcome of recording one result.
enum Recorded {
    Success,
    Failure,
    Mismatch,
    Lost,
}

/// Records that vanished or were re-claimed elsewhere are skipped, not fatal.
fn recorded<T>(
    result: Result<T, CoreError>,
    replicator: &str,
    record: &RegistryRecord,
    classify: impl FnOnce(T) -> Recorded,
) -> EngineResult<Recorded> {
    match result {
        Ok(value) => Ok(classify(value)),
        Err(e) if e.is_superseded() => {
            tracing::debug!(
                replicator,
                resource_id = %record.resource_id(),
                "claim superseded, dropping result"
            );
            Ok(Recorded::Lost)
        }
        Err(e) if e.is_contract_violation() || matches!(e, CoreError::RecordNotFound { .. }) => {
            tracing::warn!(
                replicator,
                resource_id = %record.resource_id(),
                error = %e,
                "record changed while being processed"
            );
            Ok(Recorded::Lost)
        }
        Err(e) => Err(e.into()),
    }
}

impl WorkerReport {
    fn count(&mut self, outcome: Recorded) {
        match outcome {
            Recorded::Success => self.succeeded += 1,
            Recorded::Failure => self.failed += 1,
            Recorded::Mismatch => {
                self.failed += 1;
                self.mismatched += 1;
            }
            Recorded::Lost => self.lost += 1,
        }
    }
}

/// Loops `batch` until it claims nothing, `max_batches` is reached, or
/// `cancelled` is set.
fn run_batches(
    max_batches: usize,
    cancelled: &AtomicBool,
    mut batch: impl FnMut() -> EngineResult<WorkerReport>,
) -> EngineResult<WorkerReport> {
    let mut total = WorkerReport::default();
    for _ in 0..max_batches {
        if cancelled.load(Ordering::SeqCst) {
            return Err(EngineError::Cancelled);
        }
        let report = batch()?;
        total += report;
        if report.claimed == 0 {
            break;
        }
    }
    Ok(total)
}

/// Transfers claimed records from the primary.
pub struct SyncWorker {
    machine: Arc<SyncStateMachine>,
    selector: Arc<BatchSelector>,
    transfer: Arc<dyn Transfer>,
    batch_size: usize,
}

impl SyncWorker {
    /// Creates a worker.
    pub fn new(
        machine: Arc<SyncStateMachine>,
        selector: Arc<BatchSelector>,
        transfer: Arc<dyn Transfer>,
        batch_size: usize,
    ) -> Self {
        Self {
            machine,
            selector,
            transfer,
            batch_size,
        }
    }

    /// Claims and processes one batch.
    pub fn run_batch(&self) -> EngineResult<WorkerReport> {
        let replicator = self.machine.replicator().name().to_string();
        let claimed = self.selector.claim_sync_batch(&self.machine, self.batch_size)?;
        let mut report = WorkerReport {
            batches: usize::from(!claimed.is_empty()),
            claimed: claimed.len(),
            ..WorkerReport::default()
        };

        for record in &claimed {
            let outcome = match self.transfer.transfer(&replicator, record.resource_id()) {
                Ok(()) => recorded(self.machine.mark_synced(record), &replicator, record, |_| {
                    Recorded::Success
                })?,
                Err(e) => {
                    if !e.is_retryable() {
                        tracing::error!(
                            replicator = %replicator,
                            resource_id = %record.resource_id(),
                            error = %e,
                            "non-retryable transfer error"
                        );
                    }
                    recorded(
                        self.machine.mark_failed(record, &e.to_string()),
                        &replicator,
                        record,
                        |_| Recorded::Failure,
                    )?
                }
            };
            report.count(outcome);
        }

        Ok(report)
    }

    /// Runs batches until the class is drained or `max_batches` is reached.
    pub fn run(&self, max_batches: usize, cancelled: &AtomicBool) -> EngineResult<WorkerReport> {
        run_batches(max_batches, cancelled, || self.run_batch())
    }
}

/// Checksums claimed records and compares them with the primary.
pub struct VerificationWorker {
    machine: Arc<VerificationStateMachine>,
    selector: Arc<BatchSelector>,
    checksummer: Arc<dyn LocalChecksummer>,
    batch_size: usize,
}

impl VerificationWorker {
    /// Creates a worker.
    pub fn new(
        machine: Arc<VerificationStateMachine>,
        selector: Arc<BatchSelector>,
        checksummer: Arc<dyn LocalChecksummer>,
        batch_size: usize,
    ) -> Self {
        Self {
            machine,
            selector,
            checksummer,
            batch_size,
        }
    }

    /// Claims and processes one batch.
    pub fn run_batch(&self) -> EngineResult<WorkerReport> {
        let replicator = self.machine.replicator().name().to_string();
        let claimed = self
            .selector
            .claim_verification_batch(&self.machine, self.batch_size)?;
        let mut report = WorkerReport {
            batches: usize::from(!claimed.is_empty()),
            claimed: claimed.len(),
            ..WorkerReport::default()
        };

        for record in &claimed {
            let outcome = match self.checksummer.local_checksum(&replicator, record.resource_id()) {
                Ok(checksum) => recorded(
                    self.machine.mark_verified(record, checksum),
                    &replicator,
                    record,
                    |updated| match updated.verification_state() {
                        VerificationState::Verified => Recorded::Success,
                        _ if updated.checksum_mismatch() => Recorded::Mismatch,
                        _ => Recorded::Failure,
                    },
                )?,
                Err(e) => recorded(
                    self.machine.mark_verification_failed(record, &e.to_string()),
                    &replicator,
                    record,
                    |_| Recorded::Failure,
                )?,
            };
            report.count(outcome);
        }

        Ok(report)
    }

    /// Runs batches until nothing is due or `max_batches` is reached.
    pub fn run(&self, max_batches: usize, cancelled: &AtomicBool) -> EngineResult<WorkerReport> {
        run_batches(max_batches, cancelled, || self.run_batch())
    }
}
