//! Buckets command - show a portfolio's bucket rows.

use anyhow::Result;
use clap::Args;

use crate::{Config, OutputFormat};

/// Arguments for the buckets command.
#[derive(Debug, Args)]
pub struct BucketsArgs {
    /// Portfolio code to inspect.
    #[arg(long, short = 'p', allow_negative_numbers = true)]
    pub portfolio: i64,
}

/// Execute the buckets command.
///
/// # Errors
///
/// Returns an error if the portfolio is invalid or the database fails.
pub async fn execute(args: &BucketsArgs, config: &Config) -> Result<()> {
    let service = config.open_service()?;
    let report = service.bucket_report(args.portfolio).await?;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            match &report.name {
                Some(name) => println!("Portfolio {} ({name})", report.portfolio),
                None => println!("Portfolio {}", report.portfolio),
            }
            if report.buckets.is_empty() {
                println!("  no references issued yet");
                return Ok(());
            }

            println!();
            println!("  {:<8} {:>10}", "BUCKET", "NEXT");
            for bucket in &report.buckets {
                let marker = if report.active.map(|a| a.alpha()) == Some(bucket.alpha) {
                    " (active)"
                } else {
                    ""
                };
                println!("  {:<8} {:>10}{marker}", bucket.alpha.as_char(), bucket.next_index);
            }
            println!();
            println!("  Capacity: {}", report.capacity);
            if report.exhausted {
                println!("  Status:   EXHAUSTED");
            }
        }
    }

    Ok(())
}
