//! Allocator metrics.
//!
//! Counters and histograms emitted through the `metrics` facade. Nothing is
//! recorded unless the host process installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::error::AllocationErrorKind;

// ============================================================================
// Allocation Metrics
// ============================================================================

/// Issued references counter.
pub const ALLOCATIONS: &str = "clientref_allocations_total";

/// Failed allocations counter, labelled by error kind.
pub const ALLOCATION_FAILURES: &str = "clientref_allocation_failures_total";

/// Claim attempts per successful allocation.
pub const ALLOCATION_ATTEMPTS: &str = "clientref_allocation_attempts";

// ============================================================================
// Bucket Metrics
// ============================================================================

/// Lost compare-and-swap races on a bucket.
pub const CAS_CONFLICTS: &str = "clientref_cas_conflicts_total";

/// Buckets filled and rolled over to the next letter.
pub const BUCKET_ROLLOVERS: &str = "clientref_bucket_rollovers_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all allocator metric descriptions.
///
/// Call this once at application startup after installing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(ALLOCATIONS, "Total client references issued");
    describe_counter!(ALLOCATION_FAILURES, "Total failed allocations by error kind");
    describe_histogram!(ALLOCATION_ATTEMPTS, "Claim attempts needed per allocation");
    describe_counter!(CAS_CONFLICTS, "Total lost bucket compare-and-swap races");
    describe_counter!(BUCKET_ROLLOVERS, "Total bucket rollovers to the next letter");
}

/// Records a successful allocation.
pub fn record_allocation(portfolio: u16, attempts: u32) {
    let labels = [("portfolio", portfolio.to_string())];
    counter!(ALLOCATIONS, &labels).increment(1);
    histogram!(ALLOCATION_ATTEMPTS, &labels).record(f64::from(attempts));
}

/// Records a failed allocation.
pub fn record_allocation_failure(kind: AllocationErrorKind) {
    counter!(ALLOCATION_FAILURES, "kind" => kind.as_str()).increment(1);
}

/// Records a lost race on a bucket.
pub fn record_cas_conflict(portfolio: u16) {
    counter!(CAS_CONFLICTS, "portfolio" => portfolio.to_string()).increment(1);
}

/// Records a bucket rollover.
pub fn record_rollover(portfolio: u16, from: char, to: char) {
    counter!(
        BUCKET_ROLLOVERS,
        "portfolio" => portfolio.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}
