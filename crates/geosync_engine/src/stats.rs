//! Running totals across scheduler cycles.

use crate::scheduler::CycleReport;
use std::time::{Duration, Instant};

/// Statistics about scheduler cycles.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Records synced.
    pub records_synced: u64,
    /// Failed sync attempts.
    pub sync_failures: u64,
    /// Records verified.
    pub records_verified: u64,
    /// Failed verification attempts, mismatches included.
    pub verification_failures: u64,
    /// Verifications that found differing checksums.
    pub checksum_mismatches: u64,
    /// Verification claims failed for timing out.
    pub verification_timeouts: u64,
    /// Verified records sent back for reverification.
    pub reverifications_scheduled: u64,
    /// Duration of the last completed cycle.
    pub last_cycle_duration: Option<Duration>,
    /// When the last cycle completed.
    pub last_cycle_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl EngineStats {
    pub(crate) fn record_cycle(&mut self, report: &CycleReport) {
        let totals = report.totals();
        self.cycles_completed += 1;
        self.records_synced += totals.sync.succeeded as u64;
        self.sync_failures += totals.sync.failed as u64;
        self.records_verified += totals.verification.succeeded as u64;
        self.verification_failures += totals.verification.failed as u64;
        self.checksum_mismatches += totals.verification.mismatched as u64;
        self.verification_timeouts += totals.timed_out as u64;
        self.reverifications_scheduled += totals.reverified as u64;
        self.last_cycle_duration = Some(report.duration);
        self.last_cycle_time = Some(Instant::now());
        self.last_error = None;
    }

    pub(crate) fn record_error(&mut self, error: &impl std::fmt::Display) {
        self.last_error = Some(error.to_string());
    }
}
