//! Keeps the current and next epoch's [`DutyTable`] refreshed from the beacon node (§4.4
//! `UpdateDuties`).

use crate::beacon_client::BeaconClient;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};
use types::{DutyTable, Epoch, PublicKey};

pub struct DutiesService<B> {
    beacon_node: Arc<B>,
    table: RwLock<DutyTable>,
}

impl<B: BeaconClient> DutiesService<B> {
    pub fn new(beacon_node: Arc<B>) -> Self {
        Self {
            beacon_node,
            table: RwLock::new(DutyTable::default()),
        }
    }

    /// Fetches duties for `epoch` if not already cached, then trims to the current and prior
    /// epoch (§3 DutyTable lifecycle).
    pub async fn update(&self, epoch: Epoch, pubkeys: &[PublicKey]) -> Result<(), String> {
        if self.table.read().has_epoch(epoch) {
            return Ok(());
        }
        match self.beacon_node.duties(epoch, pubkeys).await {
            Ok(duties) => {
                let mut table = self.table.write();
                let epoch_duties: Vec<_> = collect_epoch_duties(&duties, epoch);
                table.insert_epoch(epoch, epoch_duties);
                table.retain_epochs(epoch);
                debug!(%epoch, count = pubkeys.len(), "refreshed duties");
                Ok(())
            }
            Err(e) => {
                warn!(%epoch, error = %e, "failed to refresh duties");
                Err(e.to_string())
            }
        }
    }

    pub fn duties_at_slot(&self, slot: types::Slot, slots_per_epoch: u64) -> Vec<types::ValidatorDuty> {
        self.table.read().duties_at_slot(slot, slots_per_epoch)
    }
}

fn collect_epoch_duties(table: &DutyTable, epoch: Epoch) -> Vec<types::ValidatorDuty> {
    // `BeaconClient::duties` already returns a table scoped to the requested epoch; pull it back
    // out so `DutiesService` owns a single merged table rather than nesting `DutyTable`s.
    table.duties_at_epoch(epoch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon_client::FakeBeaconClient;
    use types::{ChainSpec, Hash256, Role, Slot, ValidatorStatus};

    fn duty(pubkey: PublicKey, attester_slot: Slot) -> types::ValidatorDuty {
        types::ValidatorDuty {
            pubkey,
            validator_index: 0,
            committee_index: 0,
            committee_members: 1,
            committee_position: 0,
            attester_slot: Some(attester_slot),
            proposer_slots: vec![],
            status: ValidatorStatus::Active,
        }
    }

    #[tokio::test]
    async fn update_populates_table() {
        let pk = PublicKey::from_slice(&[1u8; 48]).unwrap();
        let fake = Arc::new(FakeBeaconClient::new(ChainSpec::mainnet(), Hash256::zero()));
        let mut table = DutyTable::default();
        table.insert_epoch(Epoch::new(0), vec![duty(pk, Slot::new(3))]);
        fake.set_duties(Epoch::new(0), table);

        let service = DutiesService::new(fake);
        service.update(Epoch::new(0), &[pk]).await.unwrap();

        let duties = service.duties_at_slot(Slot::new(3), 32);
        assert_eq!(duties.len(), 1);
        assert_eq!(duties[0].roles_at(Slot::new(3), false), vec![Role::Attester]);
    }
}
