//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;

/// invsync - offline-first invoices with background sync
#[derive(Parser, Debug)]
#[command(name = "invsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.invsync/data/invsync.db)
    #[arg(long, global = true, env = "INVSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Config file (default: ~/.invsync/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Actor name for the audit trail
    #[arg(long, global = true, env = "INVSYNC_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the local store and a default config
    Init {
        /// Overwrite an existing database
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Invoice management
    Invoice {
        #[command(subcommand)]
        command: InvoiceCommands,
    },

    /// Synchronize with the remote record store
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Check every stored checksum
    Verify,

    /// Run the background sync agent until interrupted
    Watch,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
    Elvish,
}

#[derive(Subcommand, Debug)]
pub enum InvoiceCommands {
    /// Create an invoice
    Create(InvoiceCreateArgs),

    /// Edit an invoice
    Update(InvoiceUpdateArgs),

    /// Show an invoice
    Show {
        /// Record ID (or unique prefix)
        id: String,

        /// Include the audit history
        #[arg(long)]
        events: bool,
    },

    /// List invoices
    List {
        /// Filter by sync status (pending, syncing, synced, conflict, error)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of invoices to show
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Delete an invoice (queues a remote delete once synced)
    Delete {
        /// Record ID (or unique prefix)
        id: String,
    },
}

#[derive(Args, Debug)]
pub struct InvoiceCreateArgs {
    /// Invoice number (default: <prefix>-YYYYMMDD)
    #[arg(long)]
    pub number: Option<String>,

    /// Invoice date, YYYY-MM-DD (default: today)
    #[arg(long)]
    pub date: Option<String>,

    /// Client name
    #[arg(long)]
    pub client: Option<String>,

    /// Client address
    #[arg(long)]
    pub address: Option<String>,

    /// Line item as DESCRIPTION:QUANTITY:PRICE (repeatable)
    #[arg(long = "item", value_parser = parse_line_item)]
    pub items: Vec<LineItemArg>,

    /// Read the whole payload from a JSON file instead
    #[arg(long, conflicts_with_all = ["number", "date", "client", "address", "items"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InvoiceUpdateArgs {
    /// Record ID (or unique prefix)
    pub id: String,

    /// Version the edit is based on (default: the stored version)
    #[arg(long)]
    pub expect_version: Option<i64>,

    /// New invoice number
    #[arg(long)]
    pub number: Option<String>,

    /// New invoice date
    #[arg(long)]
    pub date: Option<String>,

    /// New client name
    #[arg(long)]
    pub client: Option<String>,

    /// New client address
    #[arg(long)]
    pub address: Option<String>,

    /// Append a line item as DESCRIPTION:QUANTITY:PRICE (repeatable)
    #[arg(long = "add-item", value_parser = parse_line_item)]
    pub add_items: Vec<LineItemArg>,

    /// Remove the line item with this number (repeatable)
    #[arg(long = "remove-item")]
    pub remove_items: Vec<u32>,

    /// Replace the whole payload from a JSON file
    #[arg(long, conflicts_with_all = ["number", "date", "client", "address", "add_items", "remove_items"])]
    pub file: Option<PathBuf>,
}

/// A line item given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItemArg {
    pub description: String,
    pub amount: i64,
    pub price: i64,
}

/// Parse `DESCRIPTION:QUANTITY:PRICE`. The description may itself contain colons.
fn parse_line_item(s: &str) -> std::result::Result<LineItemArg, String> {
    let mut parts = s.rsplitn(3, ':');
    let (Some(price), Some(amount), Some(description)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected DESCRIPTION:QUANTITY:PRICE, got '{s}'"));
    };

    let amount = amount
        .trim()
        .parse()
        .map_err(|_| format!("quantity must be a whole number, got '{amount}'"))?;
    let price = price
        .trim()
        .parse()
        .map_err(|_| format!("price must be a whole number, got '{price}'"))?;

    Ok(LineItemArg {
        description: description.trim().to_string(),
        amount,
        price,
    })
}

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Push every pending change once and exit
    Run,

    /// Show sync status
    Status,

    /// Put an ERROR record back in the queue
    Requeue {
        /// Record ID (or unique prefix)
        id: String,
    },

    /// Settle a record parked in CONFLICT
    Resolve {
        /// Record ID (or unique prefix)
        id: String,

        /// Keep one side as-is
        #[arg(long, value_enum, required_unless_present = "file")]
        take: Option<Side>,

        /// Use a hand-merged payload from a JSON file
        #[arg(long, conflicts_with = "take")]
        file: Option<PathBuf>,
    },

    /// List conflicts
    Conflicts {
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
    },
}

/// Which copy wins a manual resolution.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_line_item() {
        assert_eq!(
            parse_line_item("Consulting: March:3:150").unwrap(),
            LineItemArg {
                description: "Consulting: March".into(),
                amount: 3,
                price: 150,
            }
        );
        assert!(parse_line_item("Widgets:3").is_err());
        assert!(parse_line_item("Widgets:three:10").is_err());
    }

    #[test]
    fn test_resolve_requires_a_side_or_file() {
        let err = Cli::try_parse_from(["invsync", "sync", "resolve", "abc"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let cli =
            Cli::try_parse_from(["invsync", "sync", "resolve", "abc", "--take", "remote"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sync {
                command: SyncCommands::Resolve {
                    take: Some(Side::Remote),
                    ..
                }
            }
        ));
    }
}
