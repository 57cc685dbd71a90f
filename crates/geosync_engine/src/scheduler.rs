//! Scheduler cycle over every enabled replicator class.
//!
//! One cycle, per class:
//! 1. Run a pool of sync workers sized by the strategy's capacity share.
//! 2. If the class verifies: fail timed-out verification claims, schedule
//!    reverification of old verifications, then run a pool of verification
//!    workers sized by the verification capacity share.
//! 3. Otherwise mark the class's records `disabled`.
//!
//! Pools are scoped threads; the cycle returns once every worker finished.

use crate::error::{EngineError, EngineResult};
use crate::stats::EngineStats;
use crate::transport::{LocalChecksummer, Transfer};
use crate::worker::{SyncWorker, VerificationWorker, WorkerReport};
use geosync_core::{
    BatchSelector, Clock, GeoConfig, RegistryStore, Replicable, ReplicableRegistry,
    ReplicationStrategy, SyncStateMachine, VerificationState, VerificationStateMachine,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// What one cycle did for one class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassReport {
    /// Replicator class name.
    pub replicator: String,
    /// Sync workers started.
    pub sync_workers: usize,
    /// Verification workers started.
    pub verification_workers: usize,
    /// Sync results.
    pub sync: WorkerReport,
    /// Verification results.
    pub verification: WorkerReport,
    /// Verification claims failed for timing out.
    pub timed_out: usize,
    /// Verified records sent back to pending.
    pub reverified: usize,
    /// Records whose verification was disabled.
    pub disabled: usize,
}

/// What one cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Per-class reports, in registry order.
    pub classes: Vec<ClassReport>,
    /// Wall time of the cycle.
    pub duration: Duration,
}

impl CycleReport {
    /// Sums the per-class reports.
    pub fn totals(&self) -> ClassReport {
        let mut total = ClassReport {
            replicator: "total".to_string(),
            ..ClassReport::default()
        };
        for class in &self.classes {
            total.sync_workers += class.sync_workers;
            total.verification_workers += class.verification_workers;
            total.sync += class.sync;
            total.verification += class.verification;
            total.timed_out += class.timed_out;
            total.reverified += class.reverified;
            total.disabled += class.disabled;
        }
        total
    }

    /// Returns the report of one class.
    pub fn class(&self, replicator: &str) -> Option<&ClassReport> {
        self.classes.iter().find(|c| c.replicator == replicator)
    }
}

/// Drives sync and verification for every enabled class.
pub struct Scheduler {
    registry: Arc<ReplicableRegistry>,
    store: Arc<RegistryStore>,
    transfer: Arc<dyn Transfer>,
    checksummer: Arc<dyn LocalChecksummer>,
    clock: Arc<dyn Clock>,
    config: GeoConfig,
    stats: RwLock<EngineStats>,
    cancelled: AtomicBool,
}

impl Scheduler {
    /// Creates a scheduler.
    pub fn new(
        registry: Arc<ReplicableRegistry>,
        store: Arc<RegistryStore>,
        transfer: Arc<dyn Transfer>,
        checksummer: Arc<dyn LocalChecksummer>,
        clock: Arc<dyn Clock>,
        config: GeoConfig,
    ) -> Self {
        Self {
            registry,
            store,
            transfer,
            checksummer,
            clock,
            config,
            stats: RwLock::new(EngineStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Gets the current stats.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GeoConfig {
        &self.config
    }

    /// Asks running workers to stop after their current batch.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears a previous [`Self::cancel`].
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Runs one cycle over every enabled class.
    pub fn run_cycle(&self) -> EngineResult<CycleReport> {
        let start = Instant::now();
        let mut report = CycleReport::default();

        // Toggles are re-read every cycle.
        for class in self.registry.enabled_classes() {
            match self.run_class(&class) {
                Ok(class_report) => report.classes.push(class_report),
                Err(e) => {
                    self.stats.write().record_error(&e);
                    return Err(e);
                }
            }
        }

        report.duration = start.elapsed();
        self.stats.write().record_cycle(&report);

        let totals = report.totals();
        tracing::info!(
            classes = report.classes.len(),
            synced = totals.sync.succeeded,
            sync_failed = totals.sync.failed,
            verified = totals.verification.succeeded,
            verification_failed = totals.verification.failed,
            mismatched = totals.verification.mismatched,
            duration_ms = report.duration.as_millis() as u64,
            "scheduler cycle complete"
        );
        Ok(report)
    }

    /// Runs one cycle for a single class.
    pub fn run_class(&self, class: &Arc<dyn Replicable>) -> EngineResult<ClassReport> {
        let name = class.name().to_string();
        let table = self.store.table(&name);
        let selector = Arc::new(BatchSelector::new(
            table.clone(),
            self.clock.clone(),
            self.config.clone(),
        ));
        let mut report = ClassReport {
            replicator: name.clone(),
            ..ClassReport::default()
        };

        // Sync
        let sync_machine = Arc::new(SyncStateMachine::new(
            table.clone(),
            class.clone(),
            self.clock.clone(),
            self.config.clone(),
        ));
        let sync_capacity = self
            .registry
            .sync_max_capacity_per_class(class.strategy(), self.sync_budget(class.strategy()));
        let sync_batches = batches_needed(
            selector.needs_sync_count(sync_capacity.saturating_mul(self.config.sync_batch_size)),
            self.config.sync_batch_size,
        );
        report.sync_workers = sync_capacity.min(sync_batches);
        report.sync = self.run_pool(&name, report.sync_workers, || {
            SyncWorker::new(
                sync_machine.clone(),
                selector.clone(),
                self.transfer.clone(),
                self.config.sync_batch_size,
            )
            .run(self.config.max_batches_per_cycle, &self.cancelled)
        })?;

        // Verification
        let verification_machine = Arc::new(VerificationStateMachine::new(
            table.clone(),
            class.clone(),
            self.clock.clone(),
            self.config.clone(),
        ));

        if !class.verification_enabled() {
            report.disabled = self.disable_all(&verification_machine)?;
            return Ok(report);
        }

        report.timed_out = verification_machine.fail_verification_timeouts()?;
        report.reverified = verification_machine.reverify_batch(self.config.reverification_batch_size)?;

        let verification_capacity = self
            .registry
            .verification_max_capacity_per_class(self.config.verification_max_capacity);
        let verification_batches = selector.remaining_verification_batch_count(
            verification_capacity.saturating_mul(self.config.max_batches_per_cycle),
            self.config.verification_batch_size,
        );
        report.verification_workers = verification_capacity.min(verification_batches);
        report.verification = self.run_pool(&name, report.verification_workers, || {
            VerificationWorker::new(
                verification_machine.clone(),
                selector.clone(),
                self.checksummer.clone(),
                self.config.verification_batch_size,
            )
            .run(self.config.max_batches_per_cycle, &self.cancelled)
        })?;

        tracing::debug!(
            replicator = %name,
            sync_workers = report.sync_workers,
            verification_workers = report.verification_workers,
            synced = report.sync.succeeded,
            verified = report.verification.succeeded,
            "class cycle complete"
        );
        Ok(report)
    }

    fn sync_budget(&self, strategy: ReplicationStrategy) -> usize {
        match strategy {
            ReplicationStrategy::Blob => self.config.blob_sync_max_capacity,
            ReplicationStrategy::Repository => self.config.repository_sync_max_capacity,
        }
    }

    /// Marks every record of a non-verifying class `disabled`.
    ///
    /// Fresh verification claims are left to finish; the next cycle picks
    /// them up.
    fn disable_all(&self, machine: &VerificationStateMachine) -> EngineResult<usize> {
        let mut disabled = 0;
        for record in machine.table().records() {
            if record.verification_state() == VerificationState::Disabled {
                continue;
            }
            match machine.disable_verification(&record) {
                Ok(_) => disabled += 1,
                Err(e) if e.is_contract_violation() => {}
                Err(e) => return Err(e.into()),
            }
        }
        if disabled > 0 {
            tracing::info!(
                replicator = machine.replicator().name(),
                count = disabled,
                "verification disabled"
            );
        }
        Ok(disabled)
    }

    /// Runs `workers` copies of `job` on scoped threads and sums their reports.
    fn run_pool<F>(&self, replicator: &str, workers: usize, job: F) -> EngineResult<WorkerReport>
    where
        F: Fn() -> EngineResult<WorkerReport> + Sync,
    {
        if workers == 0 {
            return Ok(WorkerReport::default());
        }

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers).map(|_| scope.spawn(&job)).collect();

            let mut total = WorkerReport::default();
            let mut first_error = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(report)) => total += report,
                    Ok(Err(e)) => {
                        first_error.get_or_insert(e);
                    }
                    Err(_) => {
                        first_error.get_or_insert(EngineError::WorkerPanicked(replicator.to_string()));
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(total),
            }
        })
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registry", &self.registry)
            .field("cancelled", &self.cancelled.load(Ordering::SeqCst))
            .finish()
    }
}

fn batches_needed(due: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        due.div_ceil(batch_size)
    }
}
