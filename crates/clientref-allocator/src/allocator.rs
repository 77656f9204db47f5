//! Sequence allocation with bounded optimistic retries.
//!
//! [`SequenceAllocator::allocate`] validates the portfolio, reads the active
//! bucket and tries to claim its next sequence number. A lost race re-reads
//! the bucket and tries again after a randomized exponential backoff, up to
//! the configured attempt budget.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::Instrument;
use ulid::Ulid;

use clientref_core::observability::allocation_span;
use clientref_core::{Alpha, BucketState, PortfolioCode, PortfolioRegistry, ReferenceTriple};

use crate::config::AllocatorConfig;
use crate::error::{AllocationError, Result};
use crate::metrics;
use crate::store::{BucketStore, ClaimOutcome};

/// A committed allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// The issued triple. Its letter is the bucket claimed from, before any
    /// rollover.
    pub triple: ReferenceTriple,
    /// Active bucket state after the commit.
    pub bucket_after: BucketState,
    /// Claim attempts used, including the successful one.
    pub attempts: u32,
    /// The letter opened by this allocation, if it filled its bucket.
    pub rolled_over_to: Option<Alpha>,
}

/// Allocates sequence numbers from a [`BucketStore`].
///
/// Cheap to share: clone the `Arc` or wrap the allocator in one. Any number of
/// allocators, in any number of processes, may target the same store.
pub struct SequenceAllocator {
    store: Arc<dyn BucketStore>,
    registry: PortfolioRegistry,
    capacity: u32,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    allocator_id: Ulid,
}

impl std::fmt::Debug for SequenceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceAllocator")
            .field("allocator_id", &self.allocator_id)
            .field("capacity", &self.capacity)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl SequenceAllocator {
    /// Creates an allocator over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Config`] if the configuration is invalid.
    pub fn new(store: Arc<dyn BucketStore>, config: &AllocatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            registry: config.registry()?,
            capacity: config.capacity()?,
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
            allocator_id: Ulid::new(),
        })
    }

    /// Replaces the portfolio registry, e.g. one with registered names.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Config`] if the registry's range differs
    /// from the one the allocator was configured with.
    pub fn with_registry(mut self, registry: PortfolioRegistry) -> Result<Self> {
        if (registry.min(), registry.max()) != (self.registry.min(), self.registry.max()) {
            return Err(AllocationError::Config(format!(
                "registry range {}..={} does not match configured {}..={}",
                registry.min(),
                registry.max(),
                self.registry.min(),
                self.registry.max()
            )));
        }
        self.registry = registry;
        Ok(self)
    }

    /// Returns the identifier this allocator logs with.
    #[must_use]
    pub const fn allocator_id(&self) -> Ulid {
        self.allocator_id
    }

    /// Returns the portfolio registry.
    #[must_use]
    pub const fn registry(&self) -> &PortfolioRegistry {
        &self.registry
    }

    /// Returns the bucket capacity.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BucketStore> {
        &self.store
    }

    /// Validates a portfolio code.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::InvalidPortfolio`] if it is out of range.
    pub fn validate(&self, code: i64) -> Result<PortfolioCode> {
        Ok(self.registry.validate(code)?)
    }

    /// Allocates the next sequence number of a portfolio.
    ///
    /// The last sequence issued for a portfolio is `Z` at the bucket
    /// capacity (`1Z999` with the defaults); the call after it fails with
    /// [`AllocationError::SpaceExhausted`].
    ///
    /// # Errors
    ///
    /// - [`AllocationError::InvalidPortfolio`] before any store access
    /// - [`AllocationError::SpaceExhausted`] once bucket `Z` is full
    /// - [`AllocationError::ConcurrencyExhausted`] after `max_attempts` lost races
    /// - [`AllocationError::Storage`] if the store fails
    pub async fn allocate(&self, code: i64) -> Result<Allocation> {
        let result = self
            .allocate_inner(code)
            .instrument(allocation_span("allocate", code))
            .await;
        if let Err(err) = &result {
            metrics::record_allocation_failure(err.kind());
        }
        result
    }

    async fn allocate_inner(&self, code: i64) -> Result<Allocation> {
        let portfolio = self.validate(code)?;
        let mut observed = self.read_active(portfolio).await?;
        let mut backoff = self.backoff_base;

        for attempt in 1..=self.max_attempts {
            if observed.claim(self.capacity).is_none() {
                return Err(self.space_exhausted(portfolio, observed));
            }

            match self
                .store
                .claim_and_advance(portfolio, observed, self.capacity)
                .await?
            {
                ClaimOutcome::Claimed(claimed) => {
                    let allocation = Allocation {
                        triple: claimed.triple(),
                        bucket_after: claimed.bucket_after,
                        attempts: attempt,
                        rolled_over_to: claimed.rolled_over_to(),
                    };
                    self.record_success(&allocation);
                    return Ok(allocation);
                }
                ClaimOutcome::Exhausted { observed } => {
                    return Err(self.space_exhausted(portfolio, observed));
                }
                ClaimOutcome::Conflict { observed: seen } => {
                    metrics::record_cas_conflict(portfolio.get());
                    tracing::debug!(
                        allocator_id = %self.allocator_id,
                        attempt,
                        expected = %observed,
                        seen = ?seen.map(|s| s.to_string()),
                        "lost bucket race"
                    );
                    if attempt == self.max_attempts {
                        break;
                    }

                    tokio::time::sleep(jittered(backoff)).await;
                    backoff = backoff.saturating_mul(2).min(self.backoff_max);

                    observed = match seen {
                        Some(state) => state,
                        None => self.read_active(portfolio).await?,
                    };
                }
            }
        }

        tracing::warn!(
            allocator_id = %self.allocator_id,
            attempts = self.max_attempts,
            "allocation retry budget spent"
        );
        Err(AllocationError::ConcurrencyExhausted {
            portfolio,
            attempts: self.max_attempts,
        })
    }

    async fn read_active(&self, portfolio: PortfolioCode) -> Result<BucketState> {
        Ok(self
            .store
            .active_bucket(portfolio)
            .await?
            .unwrap_or(BucketState::INITIAL))
    }

    fn space_exhausted(&self, portfolio: PortfolioCode, observed: BucketState) -> AllocationError {
        tracing::error!(
            allocator_id = %self.allocator_id,
            bucket = %observed,
            capacity = self.capacity,
            "portfolio reference space exhausted"
        );
        AllocationError::SpaceExhausted { portfolio }
    }

    fn record_success(&self, allocation: &Allocation) {
        let triple = &allocation.triple;
        metrics::record_allocation(triple.portfolio.get(), allocation.attempts);

        if let Some(next) = allocation.rolled_over_to {
            metrics::record_rollover(triple.portfolio.get(), triple.alpha.as_char(), next.as_char());
            tracing::info!(
                allocator_id = %self.allocator_id,
                from = %triple.alpha,
                to = %next,
                "bucket rolled over"
            );
        }

        tracing::debug!(
            allocator_id = %self.allocator_id,
            alpha = %triple.alpha,
            sequence = triple.sequence,
            attempts = allocation.attempts,
            "sequence allocated"
        );
    }
}

/// Picks a delay uniformly from `[delay / 2, delay]`.
fn jittered(delay: Duration) -> Duration {
    let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(ms / 2..=ms))
}
