//! Reference buckets and the claim transition.
//!
//! A bucket is the counter state for one `(portfolio, alpha)` pair. Each
//! portfolio has exactly one *active* bucket: the one with the highest letter.
//! Claiming from the active bucket is a pure function of its state and the
//! configured capacity, shared by every store implementation so that they all
//! agree on what a claim writes:
//!
//! | observed state        | claimed      | rows written                  | active after   |
//! |-----------------------|--------------|-------------------------------|----------------|
//! | `(a, n)`, `n < cap`   | `(a, n)`     | `a := n + 1`                  | `(a, n + 1)`   |
//! | `(a, cap)`, `a < Z`   | `(a, cap)`   | `a := cap + 1`, `a + 1 := 1`  | `(a + 1, 1)`   |
//! | `(Z, cap)`            | `(Z, cap)`   | `Z := cap + 1`                | `(Z, cap + 1)` |
//! | `(Z, n)`, `n > cap`   | exhausted    | none                          | unchanged      |
//!
//! An active bucket above capacity with a letter below `Z` (possible only after
//! the capacity was lowered) is skipped: the claim is taken from a fresh bucket
//! for the next letter.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::portfolio::PortfolioCode;

/// A bucket letter, `A` through `Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct Alpha(u8);

impl Alpha {
    /// The first letter issued for every portfolio.
    pub const FIRST: Self = Self(b'A');

    /// The last letter; no rollover exists past it.
    pub const LAST: Self = Self(b'Z');

    /// Creates a letter from an uppercase ASCII character.
    #[must_use]
    pub const fn new(c: char) -> Option<Self> {
        if c.is_ascii_uppercase() {
            #[allow(clippy::cast_possible_truncation)]
            let byte = c as u8;
            Some(Self(byte))
        } else {
            None
        }
    }

    /// Returns the letter as a `char`.
    #[must_use]
    pub const fn as_char(self) -> char {
        self.0 as char
    }

    /// Returns the following letter, or `None` at `Z`.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        if self.0 < b'Z' {
            Some(Self(self.0 + 1))
        } else {
            None
        }
    }

    /// Iterates every letter from `A` to `Z`.
    pub fn all() -> impl Iterator<Item = Self> {
        (b'A'..=b'Z').map(Self)
    }
}

impl TryFrom<char> for Alpha {
    type Error = Error;

    fn try_from(c: char) -> Result<Self> {
        Self::new(c).ok_or_else(|| {
            Error::InvalidInput(format!("bucket letter must be A-Z, got {c:?}"))
        })
    }
}

impl From<Alpha> for char {
    fn from(alpha: Alpha) -> Self {
        alpha.as_char()
    }
}

impl fmt::Display for Alpha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// The `(alpha, next_index)` state of a portfolio's active bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketState {
    alpha: Alpha,
    next_index: u32,
}

impl BucketState {
    /// The virtual state of a portfolio that has never allocated.
    pub const INITIAL: Self = Self {
        alpha: Alpha::FIRST,
        next_index: 1,
    };

    /// Creates a bucket state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `next_index` is zero.
    pub fn new(alpha: Alpha, next_index: u32) -> Result<Self> {
        if next_index == 0 {
            return Err(Error::InvalidInput(format!(
                "bucket {alpha} has next_index 0; indexes start at 1"
            )));
        }
        Ok(Self { alpha, next_index })
    }

    /// Returns the bucket letter.
    #[must_use]
    pub const fn alpha(self) -> Alpha {
        self.alpha
    }

    /// Returns the next sequence number this bucket would issue.
    #[must_use]
    pub const fn next_index(self) -> u32 {
        self.next_index
    }

    /// Returns whether the bucket has issued all of its sequence numbers.
    #[must_use]
    pub const fn is_full(self, capacity: u32) -> bool {
        self.next_index > capacity
    }

    /// Computes the claim that would be taken from this state.
    ///
    /// Returns `None` when the portfolio's letter range is exhausted.
    #[must_use]
    pub fn claim(self, capacity: u32) -> Option<Claim> {
        let capacity = capacity.max(1);

        if self.next_index > capacity {
            // Full bucket below Z: claim from a fresh bucket for the next letter.
            let next = self.alpha.next()?;
            return Self::new(next, 1).ok()?.claim(capacity);
        }

        let sequence = self.next_index;
        if sequence < capacity {
            return Some(Claim {
                alpha: self.alpha,
                sequence,
                kind: ClaimKind::InPlace,
            });
        }

        let kind = match self.alpha.next() {
            Some(next) => ClaimKind::Rollover { next },
            None => ClaimKind::Final,
        };
        Some(Claim {
            alpha: self.alpha,
            sequence,
            kind,
        })
    }
}

impl fmt::Display for BucketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.alpha, self.next_index)
    }
}

/// How a claim changes the bucket layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    /// The claimed bucket stays active.
    InPlace,
    /// The claimed bucket is now full; `next` opens at index 1.
    Rollover {
        /// The letter that becomes active.
        next: Alpha,
    },
    /// The claimed bucket was the last one the portfolio can ever use.
    Final,
}

/// A sequence number claimed from a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    /// Letter of the bucket the sequence belongs to (pre-rollover).
    pub alpha: Alpha,
    /// The claimed sequence number.
    pub sequence: u32,
    /// Layout change caused by the claim.
    pub kind: ClaimKind,
}

impl Claim {
    /// Returns the row writes this claim commits, as `(alpha, next_index)`.
    ///
    /// The claimed bucket's row always comes first.
    #[must_use]
    pub fn row_writes(&self) -> Vec<(Alpha, u32)> {
        let mut writes = vec![(self.alpha, self.sequence.saturating_add(1))];
        if let ClaimKind::Rollover { next } = self.kind {
            writes.push((next, 1));
        }
        writes
    }

    /// Returns the active bucket state once the claim commits.
    #[must_use]
    pub fn bucket_after(&self) -> BucketState {
        match self.kind {
            ClaimKind::Rollover { next } => BucketState {
                alpha: next,
                next_index: 1,
            },
            ClaimKind::InPlace | ClaimKind::Final => BucketState {
                alpha: self.alpha,
                next_index: self.sequence.saturating_add(1),
            },
        }
    }

    /// Returns whether the claim opened a new bucket.
    #[must_use]
    pub const fn is_rollover(&self) -> bool {
        matches!(self.kind, ClaimKind::Rollover { .. })
    }
}

/// One persisted bucket row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceBucket {
    /// Owning portfolio.
    pub portfolio_code: PortfolioCode,
    /// Bucket letter.
    pub alpha: Alpha,
    /// Next sequence number the bucket would issue.
    pub next_index: u32,
}

impl ReferenceBucket {
    /// Returns the row as a bucket state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the stored index is zero.
    pub fn state(&self) -> Result<BucketState> {
        BucketState::new(self.alpha, self.next_index)
    }

    /// Returns whether this bucket has already issued `sequence`.
    #[must_use]
    pub const fn has_issued(&self, sequence: u32) -> bool {
        sequence >= 1 && sequence < self.next_index
    }
}

/// Returns whether `sequence` of bucket `alpha` has been issued, given a
/// portfolio's rows.
///
/// A letter without a row has issued nothing. Letters skipped after a
/// capacity change keep the index they stopped at.
#[must_use]
pub fn is_issued(rows: &[ReferenceBucket], alpha: Alpha, sequence: u32) -> bool {
    rows.iter()
        .any(|row| row.alpha == alpha && row.has_issued(sequence))
}

/// Selects the active bucket out of a portfolio's rows.
#[must_use]
pub fn active_bucket(rows: &[ReferenceBucket]) -> Option<&ReferenceBucket> {
    rows.iter().max_by_key(|row| row.alpha)
}
