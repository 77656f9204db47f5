//! # clientref-cli
//!
//! Command-line interface for client reference allocation.
//!
//! ## Commands
//!
//! - `clientref generate` - Issue one or more references for a portfolio
//! - `clientref parse` - Decompose a reference into its parts
//! - `clientref buckets` - Show a portfolio's bucket rows
//! - `clientref backfill` - Assign references to legacy records from a file
//!
//! ## Configuration
//!
//! Settings come from flags or environment variables:
//!
//! - `CLIENTREF_DB` - SQLite database path (default: `clientref.db`)
//! - `CLIENTREF_PORTFOLIO_MIN` / `CLIENTREF_PORTFOLIO_MAX` - accepted codes
//! - `CLIENTREF_SEQUENCE_WIDTH` - zero-padded sequence width
//! - `CLIENTREF_BUCKET_CAPACITY` - sequences per bucket letter
//! - `CLIENTREF_MAX_ATTEMPTS` - claim attempts under contention
//! - `CLIENTREF_BACKOFF_BASE_MS` / `CLIENTREF_BACKOFF_MAX_MS` - retry backoff
//! - `CLIENTREF_LOG_FORMAT` - `json` for JSON logs on stderr

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use clientref_allocator::config::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_MAX_ATTEMPTS,
};
use clientref_allocator::{AllocatorConfig, ClientReferenceService, SqliteBucketStore};
use clientref_core::portfolio::{DEFAULT_PORTFOLIO_MAX, DEFAULT_PORTFOLIO_MIN};
use clientref_core::reference::DEFAULT_SEQUENCE_WIDTH;

/// Path that selects a private in-memory database.
pub const IN_MEMORY_DB: &str = ":memory:";

/// clientref CLI - client reference allocation.
#[derive(Debug, Parser)]
#[command(name = "clientref")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// SQLite database holding the reference buckets.
    #[arg(long, env = "CLIENTREF_DB", default_value = "clientref.db")]
    pub db: PathBuf,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Lowest accepted portfolio code.
    #[arg(long, env = "CLIENTREF_PORTFOLIO_MIN", default_value_t = DEFAULT_PORTFOLIO_MIN)]
    pub portfolio_min: u16,

    /// Highest accepted portfolio code.
    #[arg(long, env = "CLIENTREF_PORTFOLIO_MAX", default_value_t = DEFAULT_PORTFOLIO_MAX)]
    pub portfolio_max: u16,

    /// Zero-padded width of the sequence part.
    #[arg(long, env = "CLIENTREF_SEQUENCE_WIDTH", default_value_t = DEFAULT_SEQUENCE_WIDTH)]
    pub sequence_width: u8,

    /// Sequences per bucket letter (default: the largest the width can render).
    #[arg(long, env = "CLIENTREF_BUCKET_CAPACITY")]
    pub bucket_capacity: Option<u32>,

    /// Claim attempts before giving up under contention.
    #[arg(long, env = "CLIENTREF_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Initial retry backoff in milliseconds.
    #[arg(long, env = "CLIENTREF_BACKOFF_BASE_MS", default_value_t = DEFAULT_BACKOFF_BASE_MS)]
    pub backoff_base_ms: u64,

    /// Retry backoff ceiling in milliseconds.
    #[arg(long, env = "CLIENTREF_BACKOFF_MAX_MS", default_value_t = DEFAULT_BACKOFF_MAX_MS)]
    pub backoff_max_ms: u64,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocator settings are inconsistent.
    pub fn config(&self) -> Result<Config> {
        let allocator = AllocatorConfig {
            portfolio_min: self.portfolio_min,
            portfolio_max: self.portfolio_max,
            sequence_width: self.sequence_width,
            bucket_capacity: self.bucket_capacity,
            max_attempts: self.max_attempts,
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
        };
        allocator.validate().context("invalid allocator settings")?;

        Ok(Config {
            db: self.db.clone(),
            format: self.format.clone(),
            allocator,
        })
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Issue client references.
    Generate(commands::generate::GenerateArgs),
    /// Parse a client reference.
    Parse(commands::parse::ParseArgs),
    /// Show a portfolio's buckets.
    Buckets(commands::buckets::BucketsArgs),
    /// Assign references to legacy records.
    Backfill(commands::backfill::BackfillArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path, or [`IN_MEMORY_DB`].
    pub db: PathBuf,
    /// Output format.
    pub format: OutputFormat,
    /// Allocator settings.
    pub allocator: AllocatorConfig,
}

impl Config {
    /// Opens the bucket database and builds the service.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_service(&self) -> Result<ClientReferenceService> {
        let store = if self.db.as_os_str() == IN_MEMORY_DB {
            SqliteBucketStore::open_in_memory()
        } else {
            SqliteBucketStore::open(&self.db)
        }
        .with_context(|| format!("failed to open bucket database {}", self.db.display()))?;

        ClientReferenceService::new(Arc::new(store), &self.allocator)
            .context("failed to build client reference service")
    }
}
