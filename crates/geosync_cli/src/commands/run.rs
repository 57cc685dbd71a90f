//! Run command implementation.
//!
//! Each cycle reconciles the registry against the primary directory and then
//! runs one scheduler cycle on a blocking thread. Ctrl+C cancels the cycle in
//! progress after its current batches.

use geosync_core::{GeoConfig, RegistryStore, ReplicableRegistry, SystemClock};
use geosync_engine::fs::{FsChecksumProvider, FsLayout, FsResourceFeed, FsTransfer, Sha256Checksummer};
use geosync_engine::{CycleReport, EngineError, EngineResult, Reconciler, Scheduler};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

struct Replication {
    store: Arc<RegistryStore>,
    reconciler: Reconciler,
    scheduler: Scheduler,
}

impl Replication {
    fn cycle(&self) -> EngineResult<CycleReport> {
        let reconciled = self.reconciler.reconcile()?;
        if reconciled.created > 0 || reconciled.removed > 0 {
            tracing::info!(
                created = reconciled.created,
                removed = reconciled.removed,
                "registry updated from primary"
            );
        }
        let report = self.scheduler.run_cycle()?;
        self.store.sync()?;
        Ok(report)
    }
}

/// Runs the run command.
pub fn run(
    data_dir: &Path,
    config: GeoConfig,
    primary: &Path,
    secondary: &Path,
    interval: u64,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !primary.is_dir() {
        return Err(format!("Primary directory {} not found", primary.display()).into());
    }
    config.validate()?;

    let primary = FsLayout::new(primary);
    let secondary = FsLayout::new(secondary);
    let registry = Arc::new(ReplicableRegistry::with_defaults(Arc::new(
        FsChecksumProvider::new(primary.clone()),
    )));
    let store = Arc::new(RegistryStore::open(data_dir)?);

    let replication = Arc::new(Replication {
        reconciler: Reconciler::new(
            registry.clone(),
            store.clone(),
            Arc::new(FsResourceFeed::new(primary.clone())),
        ),
        scheduler: Scheduler::new(
            registry,
            store.clone(),
            Arc::new(FsTransfer::new(primary, secondary.clone())),
            Arc::new(Sha256Checksummer::new(secondary)),
            Arc::new(SystemClock),
            config,
        ),
        store,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_loop(replication, Duration::from_secs(interval.max(1)), once))
}

async fn run_loop(
    replication: Arc<Replication>,
    interval: Duration,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = tokio::signal::ctrl_c() => {
                result?;
                println!("Received Ctrl+C, shutting down");
                break;
            }
        }

        let worker = replication.clone();
        let mut cycle = tokio::task::spawn_blocking(move || worker.cycle());

        let mut interrupted = false;
        let result = tokio::select! {
            result = &mut cycle => result?,
            result = tokio::signal::ctrl_c() => {
                result?;
                println!("Received Ctrl+C, finishing current batches");
                replication.scheduler.cancel();
                interrupted = true;
                cycle.await?
            }
        };

        match result {
            Ok(report) => {
                let totals = report.totals();
                println!(
                    "✓ Cycle complete: {} synced, {} verified, {} failed, {} mismatched",
                    totals.sync.succeeded,
                    totals.verification.succeeded,
                    totals.sync.failed + totals.verification.failed,
                    totals.verification.mismatched
                );
            }
            Err(EngineError::Cancelled) => break,
            Err(e) if once => return Err(e.into()),
            Err(e) => tracing::error!(error = %e, "replication cycle failed"),
        }

        if once || interrupted {
            break;
        }
    }

    replication.store.sync()?;
    Ok(())
}
