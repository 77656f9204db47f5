//! Backfill command - assign references to legacy records.
//!
//! The input file holds one record per line: an id, optionally followed by a
//! comma and the reference the record already carries.
//!
//! ```text
//! # legacy clients
//! client-0001
//! client-0002,2B017
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;

use clientref_allocator::{BackfillOutcome, LegacyRecord};

use crate::{Config, OutputFormat};

/// Arguments for the backfill command.
#[derive(Debug, Args)]
pub struct BackfillArgs {
    /// Portfolio code the records belong to.
    #[arg(long, short = 'p', allow_negative_numbers = true)]
    pub portfolio: i64,

    /// File listing the legacy records.
    #[arg(long, short = 'i')]
    pub input: PathBuf,
}

/// Parses legacy records, one per line.
///
/// Blank lines and lines starting with `#` are skipped.
///
/// # Errors
///
/// Returns an error naming the line if a record has no id.
pub fn parse_legacy_records(input: &str) -> Result<Vec<LegacyRecord>> {
    let mut records = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (id, existing) = match line.split_once(',') {
            Some((id, existing)) => (id.trim(), Some(existing.trim())),
            None => (line, None),
        };
        if id.is_empty() {
            bail!("line {}: record id is empty", index + 1);
        }

        records.push(match existing {
            Some(reference) if !reference.is_empty() => LegacyRecord::with_reference(id, reference),
            _ => LegacyRecord::new(id),
        });
    }
    Ok(records)
}

/// Execute the backfill command.
///
/// # Errors
///
/// Returns an error if the input cannot be read, the database fails, or the
/// batch halts before every record is processed.
pub async fn execute(args: &BackfillArgs, config: &Config) -> Result<()> {
    let input = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let records = parse_legacy_records(&input)?;

    let service = config.open_service()?;
    let report = service.backfill(args.portfolio, records).await?;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            for entry in &report.entries {
                match &entry.outcome {
                    BackfillOutcome::Assigned { reference } => {
                        println!("  {:<24} {reference}", entry.id);
                    }
                    BackfillOutcome::Kept { reference } => {
                        println!("  {:<24} {reference} (kept)", entry.id);
                    }
                    BackfillOutcome::Failed { reason } => {
                        println!("  {:<24} FAILED: {reason}", entry.id);
                    }
                }
            }
            println!();
            println!(
                "Portfolio {}: {} assigned, {} kept, {} failed",
                report.portfolio,
                report.assigned(),
                report.kept(),
                report.failed()
            );
        }
    }

    if let Some(halt) = &report.halted {
        bail!(
            "backfill halted at {} ({} records unprocessed): {}",
            halt.id,
            report.unprocessed,
            halt.message
        );
    }
    Ok(())
}
