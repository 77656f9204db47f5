//! Allocator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use clientref_core::portfolio::{DEFAULT_PORTFOLIO_MAX, DEFAULT_PORTFOLIO_MIN};
use clientref_core::reference::DEFAULT_SEQUENCE_WIDTH;
use clientref_core::{PortfolioRegistry, ReferenceFormat};

use crate::error::{AllocationError, Result};

/// Default number of claim attempts before giving up on a contended bucket.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

/// Default base delay between conflicting attempts.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5;

/// Default ceiling for the delay between conflicting attempts.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 250;

/// Configuration for the allocator and the client reference service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Lowest accepted portfolio code.
    pub portfolio_min: u16,
    /// Highest accepted portfolio code.
    pub portfolio_max: u16,
    /// Zero-padded width of the sequence part of a reference.
    pub sequence_width: u8,
    /// Sequences per bucket letter. Defaults to the largest value the width
    /// can render (999 at width 3).
    pub bucket_capacity: Option<u32>,
    /// Claim attempts before [`AllocationError::ConcurrencyExhausted`].
    pub max_attempts: u32,
    /// Base delay between conflicting attempts, in milliseconds.
    pub backoff_base_ms: u64,
    /// Maximum delay between conflicting attempts, in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            portfolio_min: DEFAULT_PORTFOLIO_MIN,
            portfolio_max: DEFAULT_PORTFOLIO_MAX,
            sequence_width: DEFAULT_SEQUENCE_WIDTH,
            bucket_capacity: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl AllocatorConfig {
    /// Loads configuration from `CLIENTREF_*` environment variables, falling
    /// back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Config`] if a variable is present but cannot
    /// be parsed, or if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse("CLIENTREF_PORTFOLIO_MIN")? {
            config.portfolio_min = v;
        }
        if let Some(v) = env_parse("CLIENTREF_PORTFOLIO_MAX")? {
            config.portfolio_max = v;
        }
        if let Some(v) = env_parse("CLIENTREF_SEQUENCE_WIDTH")? {
            config.sequence_width = v;
        }
        if let Some(v) = env_parse("CLIENTREF_BUCKET_CAPACITY")? {
            config.bucket_capacity = Some(v);
        }
        if let Some(v) = env_parse("CLIENTREF_MAX_ATTEMPTS")? {
            config.max_attempts = v;
        }
        if let Some(v) = env_parse("CLIENTREF_BACKOFF_BASE_MS")? {
            config.backoff_base_ms = v;
        }
        if let Some(v) = env_parse("CLIENTREF_BACKOFF_MAX_MS")? {
            config.backoff_max_ms = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the bucket capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: u32) -> Self {
        self.bucket_capacity = Some(capacity);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_retry_policy(mut self, max_attempts: u32, base: Duration, max: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_base_ms = base.as_millis() as u64;
        self.backoff_max_ms = max.as_millis() as u64;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.registry()?;
        let format = self.format()?;
        let capacity = self.bucket_capacity.unwrap_or_else(|| format.max_sequence());
        if capacity == 0 || capacity > format.max_sequence() {
            return Err(AllocationError::Config(format!(
                "bucket_capacity {capacity} must be within 1..={} for width {}",
                format.max_sequence(),
                format.width()
            )));
        }
        if self.max_attempts == 0 {
            return Err(AllocationError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(AllocationError::Config(format!(
                "backoff_base_ms {} exceeds backoff_max_ms {}",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }

    /// Builds the portfolio registry for the configured range.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Config`] if the range is empty or starts at 0.
    pub fn registry(&self) -> Result<PortfolioRegistry> {
        PortfolioRegistry::new(self.portfolio_min, self.portfolio_max)
            .map_err(|e| AllocationError::Config(e.to_string()))
    }

    /// Builds the reference format for the configured width.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Config`] if the width is unsupported.
    pub fn format(&self) -> Result<ReferenceFormat> {
        ReferenceFormat::new(self.sequence_width).map_err(|e| AllocationError::Config(e.to_string()))
    }

    /// Returns the effective bucket capacity.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Config`] if the width is unsupported.
    pub fn capacity(&self) -> Result<u32> {
        let format = self.format()?;
        Ok(self.bucket_capacity.unwrap_or_else(|| format.max_sequence()))
    }

    /// Returns the base backoff delay.
    #[must_use]
    pub const fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Returns the maximum backoff delay.
    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = std::env::var(name).ok() else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|e| AllocationError::Config(format!("{name}={trimmed:?} is invalid: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_reference_shape() {
        let config = AllocatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.capacity().unwrap(), 999);
        assert_eq!(config.format().unwrap().width(), 3);
        let registry = config.registry().unwrap();
        assert_eq!((registry.min(), registry.max()), (1, 10));
    }

    #[test]
    fn capacity_must_fit_width() {
        let config = AllocatorConfig::default().with_capacity(1000);
        assert!(matches!(config.validate(), Err(AllocationError::Config(_))));

        let config = AllocatorConfig::default().with_capacity(0);
        assert!(config.validate().is_err());

        let config = AllocatorConfig::default().with_capacity(3);
        config.validate().unwrap();
        assert_eq!(config.capacity().unwrap(), 3);
    }

    #[test]
    fn width_drives_default_capacity() {
        let config = AllocatorConfig {
            sequence_width: 4,
            ..AllocatorConfig::default()
        };
        assert_eq!(config.capacity().unwrap(), 9999);
    }

    #[test]
    fn rejects_bad_retry_policy() {
        let config = AllocatorConfig {
            max_attempts: 0,
            ..AllocatorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AllocatorConfig::default().with_retry_policy(
            3,
            Duration::from_millis(50),
            Duration::from_millis(10),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_portfolio_range() {
        let config = AllocatorConfig {
            portfolio_min: 5,
            portfolio_max: 4,
            ..AllocatorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_partial_config() {
        let config: AllocatorConfig =
            serde_json::from_str(r#"{"bucket_capacity": 3, "portfolio_max": 20}"#).unwrap();
        assert_eq!(config.bucket_capacity, Some(3));
        assert_eq!(config.portfolio_max, 20);
        assert_eq!(config.portfolio_min, 1);
    }
}
