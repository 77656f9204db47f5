//! The client reference service.
//!
//! The facade callers use to mint and parse references. It owns the
//! allocator and the reference format and maps every internal state onto
//! [`AllocationError`].

use std::sync::Arc;

use serde::Serialize;

use clientref_core::{
    BucketState, ClientReference, PortfolioCode, PortfolioRegistry, ReferenceBucket,
    ReferenceFormat, ReferenceTriple,
};

use crate::allocator::SequenceAllocator;
use crate::config::AllocatorConfig;
use crate::error::{AllocationError, Result};
use crate::store::BucketStore;

/// Advisory view of a portfolio's buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketReport {
    /// The portfolio.
    pub portfolio: PortfolioCode,
    /// Registered display name, if any.
    pub name: Option<String>,
    /// Active bucket, `None` before the first allocation.
    pub active: Option<BucketState>,
    /// Every bucket row, ordered by letter.
    pub buckets: Vec<ReferenceBucket>,
    /// Configured sequences per bucket.
    pub capacity: u32,
    /// Whether the portfolio can still allocate.
    pub exhausted: bool,
}

/// Mints and parses client references.
#[derive(Debug)]
pub struct ClientReferenceService {
    allocator: SequenceAllocator,
    format: ReferenceFormat,
}

impl ClientReferenceService {
    /// Creates a service over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Config`] if the configuration is invalid.
    pub fn new(store: Arc<dyn BucketStore>, config: &AllocatorConfig) -> Result<Self> {
        Ok(Self {
            allocator: SequenceAllocator::new(store, config)?,
            format: config.format()?,
        })
    }

    /// Replaces the portfolio registry, e.g. one with registered names.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Config`] if the range differs from the
    /// configured one.
    pub fn with_registry(mut self, registry: PortfolioRegistry) -> Result<Self> {
        self.allocator = self.allocator.with_registry(registry)?;
        Ok(self)
    }

    /// Returns the allocator.
    #[must_use]
    pub const fn allocator(&self) -> &SequenceAllocator {
        &self.allocator
    }

    /// Returns the portfolio registry.
    #[must_use]
    pub const fn registry(&self) -> &PortfolioRegistry {
        self.allocator.registry()
    }

    /// Returns the reference format.
    #[must_use]
    pub const fn format(&self) -> ReferenceFormat {
        self.format
    }

    /// Issues a new client reference for a portfolio.
    ///
    /// The reference is committed before it is returned; callers persist it
    /// with their record. A caller that drops the future before the claim
    /// commits consumes nothing.
    ///
    /// # Errors
    ///
    /// See [`SequenceAllocator::allocate`].
    pub async fn generate_client_reference(&self, portfolio: i64) -> Result<ClientReference> {
        let allocation = self.allocator.allocate(portfolio).await?;
        Ok(self.format.format(&allocation.triple)?)
    }

    /// Parses a client reference back into its triple.
    ///
    /// Only the grammar is checked; whether the portfolio is in the
    /// configured range is a separate question for [`Self::registry`].
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Format`] if the input is malformed.
    pub fn parse_client_reference(&self, input: &str) -> Result<ReferenceTriple> {
        Ok(self.format.parse(input)?)
    }

    /// Reports the bucket rows of a portfolio.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::InvalidPortfolio`] or
    /// [`AllocationError::Storage`].
    pub async fn bucket_report(&self, portfolio: i64) -> Result<BucketReport> {
        let code = self.allocator.validate(portfolio)?;
        let store = self.allocator.store();
        let buckets = store.buckets(code).await?;
        let active = clientref_core::bucket::active_bucket(&buckets)
            .map(ReferenceBucket::state)
            .transpose()
            .map_err(AllocationError::Storage)?;

        let capacity = self.allocator.capacity();
        let exhausted = active
            .unwrap_or(BucketState::INITIAL)
            .claim(capacity)
            .is_none();

        Ok(BucketReport {
            portfolio: code,
            name: self.registry().get(code).map(|p| p.name.clone()),
            active,
            buckets,
            capacity,
            exhausted,
        })
    }
}
