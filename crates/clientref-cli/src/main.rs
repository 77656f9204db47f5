//! clientref CLI - mint and inspect client references.
//!
//! The main entry point for the `clientref` binary.

use anyhow::Result;
use clap::Parser;

use clientref_cli::{Cli, Commands};
use clientref_core::observability::{init_logging_with_default, log_format_from_env};

fn main() -> Result<()> {
    // Logs go to stderr so command output stays machine-readable.
    init_logging_with_default(log_format_from_env(), "warn");

    let cli = Cli::parse();
    let config = cli.config()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Generate(args) => clientref_cli::commands::generate::execute(&args, &config).await,
            Commands::Parse(args) => clientref_cli::commands::parse::execute(&args, &config),
            Commands::Buckets(args) => clientref_cli::commands::buckets::execute(&args, &config).await,
            Commands::Backfill(args) => {
                clientref_cli::commands::backfill::execute(&args, &config).await
            }
        }
    })
}
