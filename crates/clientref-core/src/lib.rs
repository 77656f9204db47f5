//! # clientref-core
//!
//! Core primitives for minting client references such as `1A001`.
//!
//! This crate provides the building blocks shared by the allocator, the CLI,
//! and the test utilities:
//!
//! - **Portfolios**: validated portfolio codes and the range-bounded registry
//! - **Buckets**: bucket letters, bucket state, and the claim transition
//! - **References**: the canonical formatter and its strict parser
//! - **Storage**: object storage with compare-and-swap writes
//! - **Errors and observability**: shared error types and logging setup
//!
//! ## Example
//!
//! ```rust
//! use clientref_core::prelude::*;
//!
//! let registry = PortfolioRegistry::default();
//! let portfolio = registry.validate(1).unwrap();
//!
//! let claim = BucketState::INITIAL.claim(999).unwrap();
//! let triple = ReferenceTriple { portfolio, alpha: claim.alpha, sequence: claim.sequence };
//!
//! let reference = ReferenceFormat::default().format(&triple).unwrap();
//! assert_eq!(reference.as_str(), "1A001");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod bucket;
pub mod error;
pub mod observability;
pub mod portfolio;
pub mod reference;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bucket::{Alpha, BucketState, Claim, ClaimKind, ReferenceBucket};
    pub use crate::error::{Error, Result};
    pub use crate::portfolio::{Portfolio, PortfolioCode, PortfolioRegistry};
    pub use crate::reference::{ClientReference, FormatError, ReferenceFormat, ReferenceTriple};
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

// Re-export key types at crate root for ergonomics
pub use bucket::{Alpha, BucketState, Claim, ClaimKind, ReferenceBucket};
pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging, init_logging_with_default};
pub use portfolio::{Portfolio, PortfolioCode, PortfolioRegistry};
pub use reference::{ClientReference, FormatError, ReferenceFormat, ReferenceTriple};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
