//! CLI command implementations.

pub mod backfill;
pub mod buckets;
pub mod generate;
pub mod parse;
