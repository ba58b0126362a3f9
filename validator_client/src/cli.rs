//! Command-line surface (§6): beacon-node endpoint(s), the slashing-protection data directory,
//! and the `import`/`export` interchange subcommands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "validator_client", version, about = "Eth2 validator client")]
pub struct Cli {
    /// Data directory for the slashing-protection database and validator definitions.
    #[arg(long, value_name = "DIR")]
    pub datadir: Option<PathBuf>,

    /// Comma-separated beacon node addresses, e.g. `http://host1:5052,http://host2:5052`.
    /// The first reachable endpoint is used; others serve as fallback (§6).
    #[arg(long, value_name = "ADDRESSES", default_value = "http://localhost:5052")]
    pub beacon_nodes: String,

    /// Continue producing duties even if the beacon node reports it is not synced.
    #[arg(long)]
    pub allow_unsynced: bool,

    /// Automatically register newly discovered validator keys with the slashing protection
    /// database instead of refusing to sign for them.
    #[arg(long)]
    pub auto_register: bool,

    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub debug_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Imports an interchange JSON file into the slashing-protection database.
    Import {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
    /// Exports the slashing-protection database as an interchange JSON file.
    Export {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_run_invocation() {
        let cli = Cli::parse_from(["validator_client"]);
        assert_eq!(cli.beacon_nodes, "http://localhost:5052");
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_multi_endpoint_beacon_nodes() {
        let cli = Cli::parse_from([
            "validator_client",
            "--beacon-nodes",
            "http://a:5052,http://b:5052",
        ]);
        assert_eq!(cli.beacon_nodes, "http://a:5052,http://b:5052");
    }

    #[test]
    fn parses_import_subcommand() {
        let cli = Cli::parse_from(["validator_client", "import", "--file", "in.json"]);
        assert!(matches!(cli.command, Some(Command::Import { .. })));
    }
}
