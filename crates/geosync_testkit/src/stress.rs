//! Stress tests for concurrent claims.
//!
//! Several threads race to claim the same records through the batch
//! selector; every record must be claimed at most once per round.

use crate::fixtures::TestRegistry;
use geosync_core::ResourceId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for claim stress runs.
#[derive(Debug, Clone)]
pub struct ClaimStressConfig {
    /// Concurrent claimers.
    pub threads: usize,
    /// Records in the table.
    pub records: u64,
    /// Records each claimer asks for per batch.
    pub batch_size: usize,
    /// Rounds; each round resets every record to pending.
    pub rounds: usize,
}

impl Default for ClaimStressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            records: 200,
            batch_size: 10,
            rounds: 5,
        }
    }
}

/// Result of a claim stress run.
#[derive(Debug, Clone)]
pub struct ClaimStressResult {
    /// Successful claims.
    pub claims: usize,
    /// Records claimed more than once within a round.
    pub duplicate_claims: usize,
    /// Records never claimed within a round.
    pub unclaimed: usize,
    /// Total duration.
    pub duration: Duration,
}

impl ClaimStressResult {
    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Claims: {}", self.claims);
        println!("Duplicate claims: {}", self.duplicate_claims);
        println!("Unclaimed: {}", self.unclaimed);
        println!("Duration: {:?}", self.duration);
    }
}

/// Races `config.threads` sync claimers over the same table.
///
/// Each thread claims batches until none are left, then marks its records
/// synced. Between rounds every record is queued for resync.
pub fn stress_concurrent_sync_claims(config: &ClaimStressConfig) -> ClaimStressResult {
    let registry = TestRegistry::memory();
    for id in 1..=config.records {
        registry.seed(id);
    }

    let start = Instant::now();
    let mut claims = 0;
    let mut duplicate_claims = 0;
    let mut unclaimed = 0;

    for _ in 0..config.rounds {
        let seen: Mutex<HashMap<ResourceId, usize>> = Mutex::new(HashMap::new());
        let barrier = Barrier::new(config.threads);

        thread::scope(|scope| {
            for _ in 0..config.threads {
                scope.spawn(|| {
                    barrier.wait();
                    loop {
                        let batch = registry
                            .selector
                            .claim_sync_batch(&registry.sync, config.batch_size)
                            .expect("claim failed");
                        if batch.is_empty() {
                            break;
                        }
                        for record in &batch {
                            *seen.lock().entry(record.resource_id()).or_default() += 1;
                            registry.sync.mark_synced(record).expect("mark_synced failed");
                        }
                    }
                });
            }
        });

        let seen = seen.into_inner();
        claims += seen.values().sum::<usize>();
        duplicate_claims += seen.values().filter(|&&n| n > 1).count();
        unclaimed += config.records as usize - seen.len();

        for record in registry.table.records() {
            registry.sync.mark_for_resync(&record).expect("resync failed");
        }
    }

    ClaimStressResult {
        claims,
        duplicate_claims,
        unclaimed,
        duration: start.elapsed(),
    }
}
