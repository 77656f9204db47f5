//! Portfolio codes and the registry that bounds them.
//!
//! A portfolio is an administrative grouping of clients identified by a small
//! positive integer. Every allocation is scoped to exactly one portfolio, and
//! the registry is the guard that runs before any store access.
//!
//! # Example
//!
//! ```rust
//! use clientref_core::portfolio::PortfolioRegistry;
//!
//! let registry = PortfolioRegistry::new(1, 10).unwrap();
//! assert_eq!(registry.validate(4).unwrap().get(), 4);
//! assert!(registry.validate(0).is_err());
//! assert!(registry.validate(11).is_err());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default lowest portfolio code.
pub const DEFAULT_PORTFOLIO_MIN: u16 = 1;

/// Default highest portfolio code.
pub const DEFAULT_PORTFOLIO_MAX: u16 = 10;

/// A validated portfolio code.
///
/// Only obtainable through [`PortfolioRegistry::validate`] (or
/// [`PortfolioCode::new_unchecked`] for codes read back from storage), so
/// holding one means the code passed a range check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortfolioCode(u16);

impl PortfolioCode {
    /// Creates a portfolio code without range validation.
    ///
    /// Intended for codes that were already validated before being persisted.
    #[must_use]
    pub const fn new_unchecked(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for PortfolioCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    /// The portfolio code.
    pub code: PortfolioCode,
    /// Human-facing portfolio name.
    pub name: String,
}

/// Validates and enumerates portfolio codes within a closed range.
#[derive(Debug, Clone)]
pub struct PortfolioRegistry {
    min: u16,
    max: u16,
    portfolios: BTreeMap<PortfolioCode, Portfolio>,
}

impl Default for PortfolioRegistry {
    fn default() -> Self {
        Self {
            min: DEFAULT_PORTFOLIO_MIN,
            max: DEFAULT_PORTFOLIO_MAX,
            portfolios: BTreeMap::new(),
        }
    }
}

impl PortfolioRegistry {
    /// Creates a registry accepting codes in `min..=max`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `min` is zero or `min > max`.
    pub fn new(min: u16, max: u16) -> Result<Self> {
        if min == 0 {
            return Err(Error::InvalidInput(
                "portfolio codes must be positive (min >= 1)".to_string(),
            ));
        }
        if min > max {
            return Err(Error::InvalidInput(format!(
                "portfolio range is empty: {min}..={max}"
            )));
        }
        Ok(Self {
            min,
            max,
            portfolios: BTreeMap::new(),
        })
    }

    /// Returns the lowest accepted code.
    #[must_use]
    pub const fn min(&self) -> u16 {
        self.min
    }

    /// Returns the highest accepted code.
    #[must_use]
    pub const fn max(&self) -> u16 {
        self.max
    }

    /// Validates a raw code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPortfolio`] if `code` is outside the range.
    pub fn validate(&self, code: i64) -> Result<PortfolioCode> {
        match u16::try_from(code) {
            Ok(c) if (self.min..=self.max).contains(&c) => Ok(PortfolioCode(c)),
            _ => Err(Error::InvalidPortfolio {
                code,
                min: self.min,
                max: self.max,
            }),
        }
    }

    /// Returns whether a validated code is still inside this registry's range.
    ///
    /// Codes minted by a registry with a wider range can fail this check.
    #[must_use]
    pub fn contains(&self, code: PortfolioCode) -> bool {
        (self.min..=self.max).contains(&code.0)
    }

    /// Enumerates every accepted code in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = PortfolioCode> + '_ {
        (self.min..=self.max).map(PortfolioCode)
    }

    /// Registers a named portfolio.
    ///
    /// Re-registering a code replaces its name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPortfolio`] if the code is outside the range,
    /// or [`Error::InvalidInput`] if the name is blank.
    pub fn register(&mut self, code: i64, name: impl Into<String>) -> Result<&Portfolio> {
        let code = self.validate(code)?;
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "portfolio {code} name cannot be empty"
            )));
        }
        let portfolio = Portfolio { code, name };
        self.portfolios.insert(code, portfolio);
        self.portfolios
            .get(&code)
            .ok_or_else(|| Error::internal("registered portfolio vanished"))
    }

    /// Looks up a registered portfolio.
    #[must_use]
    pub fn get(&self, code: PortfolioCode) -> Option<&Portfolio> {
        self.portfolios.get(&code)
    }

    /// Returns every registered portfolio in code order.
    pub fn portfolios(&self) -> impl Iterator<Item = &Portfolio> {
        self.portfolios.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_range_is_one_to_ten() {
        let registry = PortfolioRegistry::default();
        assert!(registry.validate(1).is_ok());
        assert!(registry.validate(10).is_ok());
        assert!(matches!(
            registry.validate(0),
            Err(Error::InvalidPortfolio { code: 0, .. })
        ));
        assert!(matches!(
            registry.validate(11),
            Err(Error::InvalidPortfolio { code: 11, .. })
        ));
        assert!(registry.validate(-3).is_err());
        assert!(registry.validate(i64::from(u16::MAX) + 1).is_err());
    }

    #[test]
    fn codes_enumerate_the_range() {
        let registry = PortfolioRegistry::new(3, 5).unwrap();
        let codes: Vec<u16> = registry.codes().map(PortfolioCode::get).collect();
        assert_eq!(codes, vec![3, 4, 5]);
    }

    #[test]
    fn rejects_degenerate_ranges() {
        assert!(PortfolioRegistry::new(0, 10).is_err());
        assert!(PortfolioRegistry::new(5, 4).is_err());
        assert!(PortfolioRegistry::new(7, 7).is_ok());
    }

    #[test]
    fn register_checks_range_and_name() {
        let mut registry = PortfolioRegistry::default();
        registry.register(2, "North").unwrap();
        assert!(registry.register(12, "Out of range").is_err());
        assert!(registry.register(3, "  ").is_err());

        let code = registry.validate(2).unwrap();
        assert_eq!(registry.get(code).map(|p| p.name.as_str()), Some("North"));
        assert_eq!(registry.portfolios().count(), 1);
    }

    #[test]
    fn contains_respects_narrower_registry() {
        let wide = PortfolioRegistry::new(1, 20).unwrap();
        let narrow = PortfolioRegistry::default();
        let code = wide.validate(15).unwrap();
        assert!(wide.contains(code));
        assert!(!narrow.contains(code));
    }
}
