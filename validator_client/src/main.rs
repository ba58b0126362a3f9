use clap::Parser;
use slashing_protection::{export_interchange, import_interchange, ProtectionStore};
use std::sync::Arc;
use tracing::{error, info};
use validator_client::beacon_client::{BeaconClient, FakeBeaconClient};
use validator_client::cli::Cli;
use validator_client::config::{ClientMode, Config};
use validator_client::duties_service::DutiesService;
use validator_client::duty_runner::DutyRunner;
use validator_client::key_manager::{KeyManager, LocalKeyManager};
use validator_client::signing::SigningPipeline;

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(cli.debug_level.clone()))
        .init();

    let (config, mode) = Config::from_cli(&cli)?;
    let store = Arc::new(
        ProtectionStore::open_or_create(config.slashing_protection_db_path())
            .map_err(|e| e.to_string())?,
    );

    match mode {
        ClientMode::Import { file } => {
            let contents = std::fs::read_to_string(&file).map_err(|e| e.to_string())?;
            let interchange = serde_json::from_str(&contents).map_err(|e| e.to_string())?;
            let mut blacklist = Vec::new();
            import_interchange(&store, &interchange, &mut blacklist).map_err(|e| e.to_string())?;
            if !blacklist.is_empty() {
                error!(count = blacklist.len(), "some imported records were slashable and skipped");
            }
            info!(file = %file.display(), "import complete");
        }
        ClientMode::Export { file } => {
            let gvr = store
                .get_genesis_validators_root()
                .map_err(|e| e.to_string())?
                .unwrap_or_default();
            let interchange = export_interchange(&store, gvr).map_err(|e| e.to_string())?;
            let json = serde_json::to_string_pretty(&interchange).map_err(|e| e.to_string())?;
            std::fs::write(&file, json).map_err(|e| e.to_string())?;
            info!(file = %file.display(), "export complete");
        }
        ClientMode::Run => {
            run(config).await?;
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<(), String> {
    let spec = types::ChainSpec::mainnet();
    let store = Arc::new(
        ProtectionStore::open_or_create(config.slashing_protection_db_path())
            .map_err(|e| e.to_string())?,
    );

    let beacon_node = Arc::new(FakeBeaconClient::new(spec.clone(), types::Hash256::zero()));
    let genesis_validators_root = beacon_node
        .genesis_validators_root()
        .await
        .map_err(|e| e.to_string())?;
    store
        .set_genesis_validators_root(genesis_validators_root)
        .map_err(|e| e.to_string())?;

    let key_manager = Arc::new(LocalKeyManager::new(vec![]));
    for pubkey in key_manager.known_pubkeys() {
        store.register_validator(&pubkey).map_err(|e| e.to_string())?;
    }

    let duties = Arc::new(DutiesService::new(beacon_node.clone()));
    let signing = Arc::new(SigningPipeline::new(
        store,
        key_manager.clone(),
        spec.clone(),
        genesis_validators_root,
    ));
    let slot_duration = std::time::Duration::from_secs(12);
    let clock = slot_clock::ManualSlotClock::new(Some(types::Slot::new(0)), slot_duration);
    let runner = Arc::new(DutyRunner::new(
        beacon_node,
        duties,
        signing,
        key_manager,
        clock,
        spec,
        config.allow_unsynced_beacon_node,
        slot_duration,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::select! {
        _ = runner.run(shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(true);
        }
    }

    Ok(())
}
