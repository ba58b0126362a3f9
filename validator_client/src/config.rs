//! Core configuration for the validator instance (§6).

use crate::cli::{Cli, Command};
use clap_utils::parse_endpoint_list;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_DATA_DIR: &str = ".lighthouse/validators";
/// Path to the slashing protection database within the datadir.
pub const SLASHING_PROTECTION_FILENAME: &str = "slashing_protection.sqlite";

#[derive(Debug, Clone)]
pub enum ClientMode {
    Run,
    Import { file: PathBuf },
    Export { file: PathBuf },
}

/// Stores the core configuration for this validator instance.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// The data directory, which stores the slashing-protection database.
    pub data_dir: PathBuf,
    /// One or more beacon node HTTP endpoints, in fallback order.
    pub beacon_nodes: Vec<String>,
    /// If true, the validator client will still poll for duties and produce blocks even if the
    /// beacon node is not synced at startup.
    pub allow_unsynced_beacon_node: bool,
    /// If true, register new validator keys with the slashing protection database.
    pub auto_register: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|home| home.join(DEFAULT_DATA_DIR))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir,
            beacon_nodes: vec!["http://localhost:5052".to_string()],
            allow_unsynced_beacon_node: false,
            auto_register: false,
        }
    }
}

impl Config {
    pub fn slashing_protection_db_path(&self) -> PathBuf {
        self.data_dir.join(SLASHING_PROTECTION_FILENAME)
    }

    /// Builds a `Config` (and the requested [`ClientMode`]) from parsed CLI arguments.
    pub fn from_cli(cli: &Cli) -> Result<(Config, ClientMode), String> {
        let mut config = Config::default();

        if let Some(datadir) = &cli.datadir {
            config.data_dir = datadir.clone();
        }
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| format!("unable to create --datadir {:?}: {}", config.data_dir, e))?;

        config.beacon_nodes = parse_endpoint_list(&cli.beacon_nodes);
        if config.beacon_nodes.is_empty() {
            return Err("--beacon-nodes must name at least one endpoint".to_string());
        }

        config.allow_unsynced_beacon_node = cli.allow_unsynced;
        config.auto_register = cli.auto_register;

        let mode = match &cli.command {
            None => ClientMode::Run,
            Some(Command::Import { file }) => ClientMode::Import { file: file.clone() },
            Some(Command::Export { file }) => ClientMode::Export { file: file.clone() },
        };

        Ok((config, mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_to_run_mode_with_single_beacon_node() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "validator_client",
            "--datadir",
            dir.path().to_str().unwrap(),
        ]);
        let (config, mode) = Config::from_cli(&cli).unwrap();
        assert_eq!(config.beacon_nodes, vec!["http://localhost:5052"]);
        assert!(matches!(mode, ClientMode::Run));
    }

    #[test]
    fn splits_multiple_beacon_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "validator_client",
            "--datadir",
            dir.path().to_str().unwrap(),
            "--beacon-nodes",
            "http://a:1,http://b:2",
        ]);
        let (config, _) = Config::from_cli(&cli).unwrap();
        assert_eq!(config.beacon_nodes, vec!["http://a:1", "http://b:2"]);
    }
}
