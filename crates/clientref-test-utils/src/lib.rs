//! Shared test utilities for clientref integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: in-memory storage with operation recording
//!   and fault injection
//! - [`simulation`]: seeded faults and concurrent process races
//! - Factory functions for services wired to test storage
//! - Assertion helpers for issued references
//!
//! # Example
//!
//! ```rust,ignore
//! use clientref_test_utils::{assert_unique, traced_service};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let (backend, service) = traced_service(3);
//!     let reference = service.generate_client_reference(1).await.unwrap();
//!     assert_eq!(reference.as_str(), "1A001");
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod simulation;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use simulation::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("clientref_allocator=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
