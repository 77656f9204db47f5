//! Caller-facing allocation errors.
//!
//! The set is small and closed. Lost races on the bucket store
//! never appear here: they are absorbed by the allocator's retry loop and only
//! surface as [`AllocationError::ConcurrencyExhausted`] once the retry budget
//! is spent.

use serde::{Deserialize, Serialize};

use clientref_core::{FormatError, PortfolioCode};

/// The result type used throughout clientref-allocator.
pub type Result<T> = std::result::Result<T, AllocationError>;

/// Errors surfaced by the allocator and the client reference service.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The portfolio code is outside the configured range.
    #[error("invalid portfolio code {code}: expected a value in {min}..={max}")]
    InvalidPortfolio {
        /// The rejected code.
        code: i64,
        /// Lower bound of the configured range.
        min: u16,
        /// Upper bound of the configured range.
        max: u16,
    },

    /// The retry budget was spent losing races to other allocators.
    #[error("allocation for portfolio {portfolio} lost {attempts} consecutive races; retry later")]
    ConcurrencyExhausted {
        /// The contended portfolio.
        portfolio: PortfolioCode,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Every bucket letter of the portfolio is full.
    #[error(
        "portfolio {portfolio} has exhausted its reference space (bucket Z is full); operator action required"
    )]
    SpaceExhausted {
        /// The exhausted portfolio.
        portfolio: PortfolioCode,
    },

    /// A reference string could not be parsed or rendered.
    #[error("malformed client reference: {0}")]
    Format(#[from] FormatError),

    /// The allocator configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The bucket store failed.
    #[error("bucket store error: {0}")]
    Storage(#[source] clientref_core::Error),
}

impl From<clientref_core::Error> for AllocationError {
    fn from(err: clientref_core::Error) -> Self {
        match err {
            clientref_core::Error::InvalidPortfolio { code, min, max } => {
                Self::InvalidPortfolio { code, min, max }
            }
            other => Self::Storage(other),
        }
    }
}

/// Coarse classification of [`AllocationError`], used for metrics labels and
/// machine-readable reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationErrorKind {
    /// See [`AllocationError::InvalidPortfolio`].
    InvalidPortfolio,
    /// See [`AllocationError::ConcurrencyExhausted`].
    ConcurrencyExhausted,
    /// See [`AllocationError::SpaceExhausted`].
    SpaceExhausted,
    /// See [`AllocationError::Format`].
    Format,
    /// See [`AllocationError::Config`].
    Config,
    /// See [`AllocationError::Storage`].
    Storage,
}

impl AllocationErrorKind {
    /// Returns the kind as a static label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPortfolio => "invalid_portfolio",
            Self::ConcurrencyExhausted => "concurrency_exhausted",
            Self::SpaceExhausted => "space_exhausted",
            Self::Format => "format",
            Self::Config => "config",
            Self::Storage => "storage",
        }
    }
}

impl AllocationError {
    /// Returns the error's kind.
    #[must_use]
    pub const fn kind(&self) -> AllocationErrorKind {
        match self {
            Self::InvalidPortfolio { .. } => AllocationErrorKind::InvalidPortfolio,
            Self::ConcurrencyExhausted { .. } => AllocationErrorKind::ConcurrencyExhausted,
            Self::SpaceExhausted { .. } => AllocationErrorKind::SpaceExhausted,
            Self::Format(_) => AllocationErrorKind::Format,
            Self::Config(_) => AllocationErrorKind::Config,
            Self::Storage(_) => AllocationErrorKind::Storage,
        }
    }

    /// Returns whether retrying the whole operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrencyExhausted { .. } | Self::Storage(_))
    }
}
