//! Bucket store on object storage.
//!
//! All bucket rows of a portfolio live in one JSON ledger object:
//!
//! ```text
//! {prefix/}portfolio={code}/reference_buckets.json
//! ```
//!
//! A claim reads the ledger version first, then its contents, and commits with
//! `MatchesVersion` (or `DoesNotExist` for the first claim). Because a
//! rollover rewrites the whole ledger, closing the old bucket and opening the
//! next one is a single atomic write.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clientref_core::bucket::active_bucket;
use clientref_core::error::{Error, Result};
use clientref_core::storage::{StorageBackend, WritePrecondition, WriteResult};
use clientref_core::{BucketState, Claim, PortfolioCode, ReferenceBucket};

use super::{BucketStore, ClaimOutcome, ClaimedSequence, plan_claim};

/// Object name of a portfolio's ledger.
const LEDGER_FILE: &str = "reference_buckets.json";

/// Persisted bucket rows of one portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketLedger {
    portfolio_code: PortfolioCode,
    rows: Vec<ReferenceBucket>,
    updated_at: DateTime<Utc>,
}

impl BucketLedger {
    fn empty(portfolio: PortfolioCode) -> Self {
        Self {
            portfolio_code: portfolio,
            rows: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    fn active(&self) -> Result<Option<BucketState>> {
        active_bucket(&self.rows)
            .map(ReferenceBucket::state)
            .transpose()
    }

    /// Applies a claim's row writes. Indexes never move backwards.
    fn apply(&mut self, claim: &Claim) {
        for (alpha, next_index) in claim.row_writes() {
            match self.rows.iter_mut().find(|row| row.alpha == alpha) {
                Some(row) => row.next_index = row.next_index.max(next_index),
                None => self.rows.push(ReferenceBucket {
                    portfolio_code: self.portfolio_code,
                    alpha,
                    next_index,
                }),
            }
        }
        self.rows.sort_by_key(|row| row.alpha);
        self.updated_at = Utc::now();
    }
}

/// Bucket store backed by a [`StorageBackend`].
#[derive(Clone)]
pub struct ObjectBucketStore {
    backend: Arc<dyn StorageBackend>,
    prefix: Option<String>,
}

impl std::fmt::Debug for ObjectBucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBucketStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ObjectBucketStore {
    /// Creates a store writing ledgers at the root of `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            prefix: None,
        }
    }

    /// Creates a store writing ledgers under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the prefix is empty, has leading or
    /// trailing slashes, or contains `.`/`..` segments.
    pub fn with_prefix(
        backend: Arc<dyn StorageBackend>,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(Error::InvalidInput(format!(
                "ledger prefix {prefix:?} must be non-empty without leading or trailing '/'"
            )));
        }
        if prefix
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(Error::InvalidInput(format!(
                "ledger prefix {prefix:?} contains an empty or relative segment"
            )));
        }
        Ok(Self {
            backend,
            prefix: Some(prefix),
        })
    }

    /// Returns the ledger path for a portfolio.
    #[must_use]
    pub fn ledger_path(&self, portfolio: PortfolioCode) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/portfolio={portfolio}/{LEDGER_FILE}"),
            None => format!("portfolio={portfolio}/{LEDGER_FILE}"),
        }
    }

    /// Reads a ledger and the version it was read at.
    ///
    /// The version is fetched before the contents, so a concurrent write
    /// between the two reads makes the later commit fail its precondition
    /// instead of overwriting newer rows.
    async fn read_ledger(
        &self,
        portfolio: PortfolioCode,
    ) -> Result<(BucketLedger, Option<String>)> {
        let path = self.ledger_path(portfolio);
        let Some(meta) = self.backend.head(&path).await? else {
            return Ok((BucketLedger::empty(portfolio), None));
        };

        let bytes = self.backend.get(&path).await?;
        let ledger: BucketLedger =
            serde_json::from_slice(&bytes).map_err(|e| Error::Serialization {
                message: format!("failed to parse bucket ledger {path}: {e}"),
            })?;

        if ledger.portfolio_code != portfolio {
            return Err(Error::Internal {
                message: format!(
                    "bucket ledger {path} belongs to portfolio {}",
                    ledger.portfolio_code
                ),
            });
        }

        Ok((ledger, Some(meta.version)))
    }
}

#[async_trait]
impl BucketStore for ObjectBucketStore {
    async fn active_bucket(&self, portfolio: PortfolioCode) -> Result<Option<BucketState>> {
        let (ledger, _) = self.read_ledger(portfolio).await?;
        ledger.active()
    }

    async fn claim_and_advance(
        &self,
        portfolio: PortfolioCode,
        expected: BucketState,
        capacity: u32,
    ) -> Result<ClaimOutcome> {
        let (mut ledger, version) = self.read_ledger(portfolio).await?;
        let current = ledger.active()?.unwrap_or(BucketState::INITIAL);

        let claim = match plan_claim(current, expected, capacity) {
            Ok(claim) => claim,
            Err(outcome) => return Ok(outcome),
        };

        ledger.apply(&claim);
        let data = serde_json::to_vec(&ledger).map_err(|e| Error::Serialization {
            message: format!("failed to serialize bucket ledger: {e}"),
        })?;

        let precondition = version.map_or(
            WritePrecondition::DoesNotExist,
            WritePrecondition::MatchesVersion,
        );
        let path = self.ledger_path(portfolio);

        match self.backend.put(&path, Bytes::from(data), precondition).await? {
            WriteResult::Success { version } => {
                tracing::trace!(%portfolio, %version, sequence = claim.sequence, "ledger committed");
                Ok(ClaimOutcome::Claimed(ClaimedSequence {
                    portfolio,
                    claim,
                    bucket_after: claim.bucket_after(),
                }))
            }
            WriteResult::PreconditionFailed { current_version } => {
                tracing::debug!(%portfolio, %current_version, "ledger changed during claim");
                Ok(ClaimOutcome::Conflict { observed: None })
            }
        }
    }

    async fn buckets(&self, portfolio: PortfolioCode) -> Result<Vec<ReferenceBucket>> {
        let (ledger, _) = self.read_ledger(portfolio).await?;
        Ok(ledger.rows)
    }
}
