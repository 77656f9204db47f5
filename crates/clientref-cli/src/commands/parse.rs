//! Parse command - decompose a client reference.

use anyhow::Result;
use clap::Args;

use crate::{Config, OutputFormat};

/// Arguments for the parse command.
#[derive(Debug, Args)]
pub struct ParseArgs {
    /// Reference to parse, e.g. `1A001`.
    pub reference: String,
}

/// Execute the parse command.
///
/// Parsing needs no database.
///
/// # Errors
///
/// Returns an error if the reference is malformed.
pub fn execute(args: &ParseArgs, config: &Config) -> Result<()> {
    let format = config.allocator.format()?;
    let triple = format.parse(&args.reference)?;
    let registry = config.allocator.registry()?;
    let in_range = registry.contains(triple.portfolio);

    match config.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "reference": args.reference,
                "portfolio": triple.portfolio,
                "alpha": triple.alpha,
                "sequence": triple.sequence,
                "portfolioInRange": in_range,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("  Portfolio: {}", triple.portfolio);
            println!("  Bucket:    {}", triple.alpha);
            println!("  Sequence:  {}", triple.sequence);
            if !in_range {
                println!(
                    "  Warning:   portfolio outside configured range {}..={}",
                    registry.min(),
                    registry.max()
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;

    fn config() -> Config {
        Cli::parse_from(["clientref", "parse", "1A001"]).config().unwrap()
    }

    #[test]
    fn test_parse_accepts_canonical_reference() {
        let args = ParseArgs {
            reference: "10Z999".into(),
        };
        execute(&args, &config()).unwrap();
    }

    #[test]
    fn test_parse_rejects_malformed_reference() {
        let args = ParseArgs {
            reference: "1A0001".into(),
        };
        assert!(execute(&args, &config()).is_err());
    }
}
