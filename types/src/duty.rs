use crate::fixed_bytes::PublicKey;
use crate::slot_epoch::{Epoch, Slot};
use serde::{Deserialize, Serialize};

/// Validator lifecycle status as reported by the beacon node (§3 Duties status variants).
///
/// Only `Active` and `Exiting` produce duties; the others are awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorStatus {
    Unknown,
    Deposited,
    Pending,
    Active,
    Exiting,
    Slashing,
    Exited,
}

impl ValidatorStatus {
    /// True once the status satisfies `WaitForActivation` (§4.4).
    pub fn is_activated(self) -> bool {
        matches!(self, ValidatorStatus::Active | ValidatorStatus::Exiting)
    }

    pub fn produces_duties(self) -> bool {
        self.is_activated()
    }
}

/// The roles a pubkey may carry at a single slot (§3 Role).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Attester,
    Proposer,
    Aggregator,
    Unknown,
}

/// One validator's committee assignment and proposal slots for an epoch (§3 DutyTable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorDuty {
    pub pubkey: PublicKey,
    pub validator_index: u64,
    pub committee_index: u64,
    pub committee_members: u64,
    /// Position of this validator within its committee; needed for aggregation bitfields.
    pub committee_position: u64,
    pub attester_slot: Option<Slot>,
    pub proposer_slots: Vec<Slot>,
    pub status: ValidatorStatus,
}

impl ValidatorDuty {
    /// Roles active at `slot`, in the execution order defined by §4.4 (Proposer first).
    pub fn roles_at(&self, slot: Slot, is_aggregator: bool) -> Vec<Role> {
        if !self.status.produces_duties() {
            return vec![Role::Unknown];
        }

        let mut roles = Vec::new();
        if self.proposer_slots.contains(&slot) {
            roles.push(Role::Proposer);
        }
        if self.attester_slot == Some(slot) {
            roles.push(Role::Attester);
            if is_aggregator {
                roles.push(Role::Aggregator);
            }
        }
        if roles.is_empty() {
            roles.push(Role::Unknown);
        }
        roles
    }
}

/// Per-epoch table of duties, indexed by pubkey; the prior epoch is retained for late work
/// (§3 DutyTable lifecycle). Exclusively owned by the duty runner.
#[derive(Debug, Default, Clone)]
pub struct DutyTable {
    epochs: std::collections::BTreeMap<Epoch, std::collections::HashMap<PublicKey, ValidatorDuty>>,
}

impl DutyTable {
    pub fn insert_epoch(&mut self, epoch: Epoch, duties: Vec<ValidatorDuty>) {
        let map = duties.into_iter().map(|d| (d.pubkey, d)).collect();
        self.epochs.insert(epoch, map);
    }

    pub fn has_epoch(&self, epoch: Epoch) -> bool {
        self.epochs.contains_key(&epoch)
    }

    pub fn duties_at_epoch(&self, epoch: Epoch) -> Vec<ValidatorDuty> {
        self.epochs
            .get(&epoch)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn duties_at_slot(&self, slot: Slot, slots_per_epoch: u64) -> Vec<ValidatorDuty> {
        let epoch = slot.epoch(slots_per_epoch);
        self.epochs
            .get(&epoch)
            .map(|m| {
                m.values()
                    .filter(|d| d.attester_slot == Some(slot) || d.proposer_slots.contains(&slot))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Retains only the given epoch and its immediate predecessor (covers "prior epoch retained
    /// for late work", §3).
    pub fn retain_epochs(&mut self, current: Epoch) {
        let floor = current.checked_sub(Epoch::new(1)).unwrap_or(Epoch::new(0));
        self.epochs.retain(|epoch, _| *epoch >= floor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duty(pubkey: PublicKey, attester_slot: Option<Slot>, proposer_slots: Vec<Slot>) -> ValidatorDuty {
        ValidatorDuty {
            pubkey,
            validator_index: 0,
            committee_index: 0,
            committee_members: 1,
            committee_position: 0,
            attester_slot,
            proposer_slots,
            status: ValidatorStatus::Active,
        }
    }

    #[test]
    fn duties_at_slot_filters_correctly() {
        let mut table = DutyTable::default();
        let pk = PublicKey([1; 48]);
        table.insert_epoch(Epoch::new(0), vec![duty(pk, Some(Slot::new(3)), vec![Slot::new(5)])]);

        assert_eq!(table.duties_at_slot(Slot::new(3), 32).len(), 1);
        assert_eq!(table.duties_at_slot(Slot::new(5), 32).len(), 1);
        assert_eq!(table.duties_at_slot(Slot::new(4), 32).len(), 0);
    }

    #[test]
    fn retain_epochs_keeps_prior_epoch() {
        let mut table = DutyTable::default();
        let pk = PublicKey([1; 48]);
        table.insert_epoch(Epoch::new(0), vec![duty(pk, None, vec![])]);
        table.insert_epoch(Epoch::new(1), vec![duty(pk, None, vec![])]);
        table.insert_epoch(Epoch::new(2), vec![duty(pk, None, vec![])]);

        table.retain_epochs(Epoch::new(2));
        assert!(!table.has_epoch(Epoch::new(0)));
        assert!(table.has_epoch(Epoch::new(1)));
        assert!(table.has_epoch(Epoch::new(2)));
    }

    #[test]
    fn unactivated_status_yields_no_duties() {
        let pk = PublicKey([1; 48]);
        let mut d = duty(pk, Some(Slot::new(1)), vec![]);
        d.status = ValidatorStatus::Pending;
        assert_eq!(d.roles_at(Slot::new(1), false), vec![Role::Unknown]);
    }
}
