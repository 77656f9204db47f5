//! Canonical client reference strings.
//!
//! A client reference renders as `<portfolio><alpha><sequence>`, with the
//! sequence zero-padded to a fixed width: portfolio `1`, bucket `A`, sequence
//! `1` at width 3 is `1A001`. Parsing is the strict inverse of formatting, so
//! every string this module produces decomposes back into exactly one triple.
//!
//! # Example
//!
//! ```rust
//! use clientref_core::reference::ReferenceFormat;
//!
//! let format = ReferenceFormat::default();
//! let triple = format.parse("9I009").unwrap();
//! assert_eq!(triple.portfolio.get(), 9);
//! assert_eq!(triple.alpha.as_char(), 'I');
//! assert_eq!(triple.sequence, 9);
//! assert_eq!(format.format(&triple).unwrap().as_str(), "9I009");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bucket::Alpha;
use crate::portfolio::PortfolioCode;

/// Default zero-padded width of the sequence part.
pub const DEFAULT_SEQUENCE_WIDTH: u8 = 3;

/// Widest sequence a `u32` can carry without overflow.
pub const MAX_SEQUENCE_WIDTH: u8 = 9;

/// Errors produced when formatting or parsing a client reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// The sequence width is outside `1..=MAX_SEQUENCE_WIDTH`.
    #[error("sequence width {width} is outside 1..={MAX_SEQUENCE_WIDTH}")]
    InvalidWidth {
        /// The rejected width.
        width: u8,
    },

    /// The reference does not start with a portfolio code.
    #[error("client reference {input:?} must start with a portfolio code")]
    MissingPortfolio {
        /// The rejected input.
        input: String,
    },

    /// The portfolio code is zero, zero-padded, or too large.
    #[error("client reference {input:?} has an invalid portfolio code")]
    InvalidPortfolio {
        /// The rejected input.
        input: String,
    },

    /// The portfolio code is not followed by one uppercase letter.
    #[error("client reference {input:?} must have a single A-Z bucket letter after the portfolio code")]
    MissingAlpha {
        /// The rejected input.
        input: String,
    },

    /// The sequence part is not exactly `width` digits.
    #[error("client reference {input:?} must end with exactly {width} digits")]
    SequenceWidth {
        /// The rejected input.
        input: String,
        /// Expected number of digits.
        width: u8,
    },

    /// The sequence is zero, which is never issued.
    #[error("client reference {input:?} has sequence 0")]
    ZeroSequence {
        /// The rejected input.
        input: String,
    },

    /// A sequence does not fit the configured width.
    #[error("sequence {sequence} does not fit in {width} digits")]
    SequenceOverflow {
        /// The sequence that was too large.
        sequence: u32,
        /// The configured width.
        width: u8,
    },
}

/// The decomposed form of a client reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceTriple {
    /// Issuing portfolio.
    pub portfolio: PortfolioCode,
    /// Bucket letter the sequence was claimed from.
    pub alpha: Alpha,
    /// Sequence within the bucket, starting at 1.
    pub sequence: u32,
}

/// A formatted client reference.
///
/// Only produced by [`ReferenceFormat::format`] and
/// [`ReferenceFormat::parse_reference`], so the inner string always parses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientReference(String);

impl ClientReference {
    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the reference and returns the owned string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ClientReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Formats and parses references for one sequence width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceFormat {
    width: u8,
}

impl Default for ReferenceFormat {
    fn default() -> Self {
        Self {
            width: DEFAULT_SEQUENCE_WIDTH,
        }
    }
}

impl ReferenceFormat {
    /// Creates a format with the given sequence width.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidWidth`] if `width` is zero or above
    /// [`MAX_SEQUENCE_WIDTH`].
    pub const fn new(width: u8) -> Result<Self, FormatError> {
        if width == 0 || width > MAX_SEQUENCE_WIDTH {
            return Err(FormatError::InvalidWidth { width });
        }
        Ok(Self { width })
    }

    /// Returns the sequence width.
    #[must_use]
    pub const fn width(self) -> u8 {
        self.width
    }

    /// Returns the largest sequence this width can render.
    #[must_use]
    pub const fn max_sequence(self) -> u32 {
        10_u32.pow(self.width as u32) - 1
    }

    /// Renders a triple.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::ZeroSequence`] or
    /// [`FormatError::SequenceOverflow`] if the sequence cannot be rendered in
    /// a form that parses back.
    pub fn format(self, triple: &ReferenceTriple) -> Result<ClientReference, FormatError> {
        if triple.sequence == 0 {
            return Err(FormatError::ZeroSequence {
                input: format!("{}{}{}", triple.portfolio, triple.alpha, 0),
            });
        }
        if triple.sequence > self.max_sequence() {
            return Err(FormatError::SequenceOverflow {
                sequence: triple.sequence,
                width: self.width,
            });
        }
        Ok(ClientReference(format!(
            "{}{}{:0width$}",
            triple.portfolio,
            triple.alpha,
            triple.sequence,
            width = usize::from(self.width)
        )))
    }

    /// Parses a reference string back into its triple.
    ///
    /// The grammar is strict: one or more digits without a leading zero, one
    /// uppercase ASCII letter, then exactly `width` digits encoding a nonzero
    /// sequence. Surrounding whitespace is rejected.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] naming the first part that failed.
    pub fn parse(self, input: &str) -> Result<ReferenceTriple, FormatError> {
        let owned = || input.to_string();
        let bytes = input.as_bytes();

        let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return Err(FormatError::MissingPortfolio { input: owned() });
        }
        if bytes[0] == b'0' {
            return Err(FormatError::InvalidPortfolio { input: owned() });
        }
        let portfolio: u16 = input[..digits]
            .parse()
            .map_err(|_| FormatError::InvalidPortfolio { input: owned() })?;

        let alpha = bytes
            .get(digits)
            .and_then(|b| Alpha::new(char::from(*b)))
            .ok_or_else(|| FormatError::MissingAlpha { input: owned() })?;

        let tail = &bytes[digits + 1..];
        if tail.len() != usize::from(self.width) || !tail.iter().all(u8::is_ascii_digit) {
            return Err(FormatError::SequenceWidth {
                input: owned(),
                width: self.width,
            });
        }
        let sequence: u32 = input[digits + 1..]
            .parse()
            .map_err(|_| FormatError::SequenceWidth {
                input: owned(),
                width: self.width,
            })?;
        if sequence == 0 {
            return Err(FormatError::ZeroSequence { input: owned() });
        }

        Ok(ReferenceTriple {
            portfolio: PortfolioCode::new_unchecked(portfolio),
            alpha,
            sequence,
        })
    }

    /// Parses a string and returns it as a [`ClientReference`].
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] if the string does not parse.
    pub fn parse_reference(self, input: &str) -> Result<ClientReference, FormatError> {
        self.parse(input)?;
        Ok(ClientReference(input.to_string()))
    }
}
