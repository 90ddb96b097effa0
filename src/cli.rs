//! CLI argument parsing for the customer-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "customer-worker", about = "Customer management backend worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Import one spreadsheet and print the final job status
    Import {
        /// Path to an .xlsx or .xls file
        file: PathBuf,
        /// Use in-memory stores instead of PostgreSQL
        #[arg(long)]
        dry_run: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["customer-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["customer-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_import_command_parses() {
        let cli = Cli::parse_from(["customer-worker", "import", "customers.xlsx", "--dry-run"]);
        match cli.command {
            Some(Command::Import { file, dry_run }) => {
                assert_eq!(file, PathBuf::from("customers.xlsx"));
                assert!(dry_run);
            }
            _ => panic!("expected import command"),
        }
    }

    #[test]
    fn test_cli_import_requires_file() {
        assert!(Cli::try_parse_from(["customer-worker", "import"]).is_err());
    }
}
