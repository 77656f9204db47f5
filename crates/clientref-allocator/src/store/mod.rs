//! Durable bucket storage.
//!
//! The [`BucketStore`] trait is the persistence layer for reference buckets.
//! It exposes a single mutating primitive, [`BucketStore::claim_and_advance`],
//! which is an optimistic compare-and-swap on a portfolio's active bucket.
//!
//! ## Implementations
//!
//! - [`ObjectBucketStore`]: one JSON ledger per portfolio on any
//!   [`StorageBackend`](clientref_core::StorageBackend) with conditional writes
//! - [`SqliteBucketStore`]: one row per bucket in a SQLite database

pub mod object;
pub mod sqlite;

use async_trait::async_trait;

use clientref_core::{Alpha, BucketState, Claim, PortfolioCode, ReferenceBucket, ReferenceTriple};
use clientref_core::Result;

pub use object::ObjectBucketStore;
pub use sqlite::SqliteBucketStore;

/// A sequence number committed by [`BucketStore::claim_and_advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimedSequence {
    /// Portfolio the sequence belongs to.
    pub portfolio: PortfolioCode,
    /// The committed claim.
    pub claim: Claim,
    /// Active bucket state after the commit.
    pub bucket_after: BucketState,
}

impl ClaimedSequence {
    /// Returns the issued triple.
    #[must_use]
    pub const fn triple(&self) -> ReferenceTriple {
        ReferenceTriple {
            portfolio: self.portfolio,
            alpha: self.claim.alpha,
            sequence: self.claim.sequence,
        }
    }

    /// Returns the letter that became active, if the claim rolled over.
    #[must_use]
    pub fn rolled_over_to(&self) -> Option<Alpha> {
        self.claim.is_rollover().then_some(self.bucket_after.alpha())
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The claim committed.
    Claimed(ClaimedSequence),
    /// Another writer advanced the bucket first. Nothing was written.
    Conflict {
        /// The state the store saw, if it read one. `None` means the caller
        /// must re-read before retrying.
        observed: Option<BucketState>,
    },
    /// The portfolio has no sequence numbers left. Nothing was written.
    Exhausted {
        /// The terminal state.
        observed: BucketState,
    },
}

impl ClaimOutcome {
    /// Returns true if the claim committed.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }
}

/// Storage abstraction for reference buckets.
///
/// ## CAS Semantics
///
/// `claim_and_advance` must be serializable relative to every other claim on
/// the same portfolio: it commits only if the active bucket still equals
/// `expected`, and a rollover (old row full, next row opened) commits
/// atomically with the claim. A lost race is reported as
/// [`ClaimOutcome::Conflict`], never as an error, and never blocks.
///
/// Bucket rows are written only by `claim_and_advance`. Other reads are
/// advisory.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Reads the active bucket of a portfolio.
    ///
    /// Returns `None` if the portfolio has never allocated.
    async fn active_bucket(&self, portfolio: PortfolioCode) -> Result<Option<BucketState>>;

    /// Claims the next sequence number if the active bucket equals `expected`.
    ///
    /// A portfolio with no rows is treated as [`BucketState::INITIAL`].
    async fn claim_and_advance(
        &self,
        portfolio: PortfolioCode,
        expected: BucketState,
        capacity: u32,
    ) -> Result<ClaimOutcome>;

    /// Lists every bucket row of a portfolio, ordered by letter.
    async fn buckets(&self, portfolio: PortfolioCode) -> Result<Vec<ReferenceBucket>>;
}

/// Decides a claim against the state currently held by a store.
///
/// Returns `Err(outcome)` when nothing must be written.
pub(crate) fn plan_claim(
    current: BucketState,
    expected: BucketState,
    capacity: u32,
) -> std::result::Result<Claim, ClaimOutcome> {
    if current != expected {
        return Err(ClaimOutcome::Conflict {
            observed: Some(current),
        });
    }
    current
        .claim(capacity)
        .ok_or(ClaimOutcome::Exhausted { observed: current })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(c: char, next: u32) -> BucketState {
        BucketState::new(Alpha::new(c).unwrap(), next).unwrap()
    }

    #[test]
    fn plan_reports_conflict_with_current_state() {
        let outcome = plan_claim(state('A', 4), state('A', 3), 10).unwrap_err();
        assert_eq!(
            outcome,
            ClaimOutcome::Conflict {
                observed: Some(state('A', 4))
            }
        );
    }

    #[test]
    fn plan_reports_exhaustion_at_z() {
        let terminal = state('Z', 4);
        let outcome = plan_claim(terminal, terminal, 3).unwrap_err();
        assert_eq!(outcome, ClaimOutcome::Exhausted { observed: terminal });
    }

    #[test]
    fn claimed_sequence_reports_rollover_target() {
        let claim = state('A', 3).claim(3).unwrap();
        let claimed = ClaimedSequence {
            portfolio: PortfolioCode::new_unchecked(1),
            claim,
            bucket_after: claim.bucket_after(),
        };
        assert_eq!(claimed.rolled_over_to(), Alpha::new('B'));
        assert_eq!(claimed.triple().sequence, 3);
        assert_eq!(claimed.triple().alpha, Alpha::FIRST);
    }
}
