//! Concurrency budgets per replicator class.
//!
//! The allocator only sizes pools; callers enforce the returned limit with
//! their own worker pool or semaphore.

/// Schedulers outside the replicator framework that share the verification
/// budget (one, covering projects and wikis).
pub const LEGACY_VERIFICATION_SCHEDULERS: usize = 1;

/// Returns the per-class share of `total_capacity`.
///
/// The budget is split evenly across the classes plus `legacy_scheduler_count`
/// using floor division, and every class is guaranteed at least one slot even
/// when the budget is smaller than the number of classes. With nothing to
/// divide by, the whole budget (at least one slot) is returned.
pub fn allocate<T>(
    total_capacity: usize,
    verification_enabled_classes: &[T],
    legacy_scheduler_count: usize,
) -> usize {
    let divisor = verification_enabled_classes.len() + legacy_scheduler_count;
    if divisor == 0 {
        return total_capacity.max(1);
    }
    (total_capacity / divisor).max(1)
}
