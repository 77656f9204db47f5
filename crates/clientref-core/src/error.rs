//! Error types and result aliases shared by clientref components.
//!
//! Errors are structured for programmatic handling. Conflicts on conditional
//! writes are *not* errors: they are reported as normal results by the storage
//! and bucket store contracts.

/// The result type used throughout clientref.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in clientref core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A portfolio code outside the configured range was supplied.
    #[error("invalid portfolio code {code}: expected a value in {min}..={max}")]
    InvalidPortfolio {
        /// The rejected code.
        code: i64,
        /// Lower bound of the configured range.
        min: u16,
        /// Upper bound of the configured range.
        max: u16,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_portfolio_message_names_range() {
        let err = Error::InvalidPortfolio {
            code: 11,
            min: 1,
            max: 10,
        };
        assert_eq!(
            err.to_string(),
            "invalid portfolio code 11: expected a value in 1..=10"
        );
    }

    #[test]
    fn storage_error_keeps_source() {
        let io = std::io::Error::other("disk full");
        let err = Error::storage_with_source("write ledger", io);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "storage error: write ledger");
    }
}
