//! Generate command - issue client references.

use anyhow::{Result, bail};
use clap::Args;

use crate::{Config, OutputFormat};

/// Arguments for the generate command.
#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Portfolio code to allocate from.
    #[arg(long, short = 'p', allow_negative_numbers = true)]
    pub portfolio: i64,

    /// Number of references to issue.
    #[arg(long, short = 'n', default_value_t = 1)]
    pub count: u32,
}

/// Execute the generate command.
///
/// References issued before a failure are still printed; they are committed
/// and will not be issued again.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or an allocation fails.
pub async fn execute(args: &GenerateArgs, config: &Config) -> Result<()> {
    if args.count == 0 {
        bail!("--count must be at least 1");
    }

    let service = config.open_service()?;
    let mut issued = Vec::new();
    let mut failure = None;

    for _ in 0..args.count {
        match service.generate_client_reference(args.portfolio).await {
            Ok(reference) => issued.push(reference),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    match config.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "portfolio": args.portfolio,
                "references": issued,
                "error": failure.as_ref().map(|e| serde_json::json!({
                    "kind": e.kind(),
                    "message": e.to_string(),
                })),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for reference in &issued {
                println!("{reference}");
            }
        }
    }

    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: GenerateArgs,
    }

    #[test]
    fn test_generate_args_parsing() {
        let cli = TestCli::parse_from(["test", "--portfolio", "3", "--count", "5"]);
        assert_eq!(cli.args.portfolio, 3);
        assert_eq!(cli.args.count, 5);

        let cli = TestCli::parse_from(["test", "-p", "-1"]);
        assert_eq!(cli.args.portfolio, -1);
        assert_eq!(cli.args.count, 1);
    }
}
