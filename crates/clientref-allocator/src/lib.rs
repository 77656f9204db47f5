//! # clientref-allocator
//!
//! Concurrency-safe allocation of client references.
//!
//! References look like `1A001`: a portfolio code, a bucket letter and a
//! zero-padded sequence. Each portfolio fills bucket `A` up to its capacity,
//! then rolls over to `B`, and so on up to `Z`.
//!
//! ## Components
//!
//! - [`store`]: durable buckets with an optimistic compare-and-swap claim
//! - [`SequenceAllocator`]: the bounded retry loop around a claim
//! - [`ClientReferenceService`]: the facade that validates, allocates,
//!   formats and parses
//! - [`backfill`]: batch assignment for legacy records
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use clientref_allocator::{AllocatorConfig, ClientReferenceService, SqliteBucketStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteBucketStore::open_in_memory()?);
//! let service = ClientReferenceService::new(store, &AllocatorConfig::default())?;
//!
//! let reference = service.generate_client_reference(1).await?;
//! assert_eq!(reference.as_str(), "1A001");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod allocator;
pub mod backfill;
pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod store;

pub use allocator::{Allocation, SequenceAllocator};
pub use backfill::{BackfillEntry, BackfillHalt, BackfillOutcome, BackfillReport, LegacyRecord};
pub use config::AllocatorConfig;
pub use error::{AllocationError, AllocationErrorKind, Result};
pub use service::{BucketReport, ClientReferenceService};
pub use store::{
    BucketStore, ClaimOutcome, ClaimedSequence, ObjectBucketStore, SqliteBucketStore,
};
