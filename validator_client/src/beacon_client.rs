//! `BeaconClient`: the beacon-node RPC surface the duty runner consumes (§6).
//!
//! The wire protocol (REST/gRPC, retries, multi-endpoint fallback ordering) is an external
//! collaborator per scope; this module is the trait boundary plus a fake implementation used to
//! exercise the duty runner and signing pipeline in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use types::{
    AttestationData, ChainSpec, CommitteeIndex, DutyTable, Epoch, Hash256, PublicKey, Signature,
    Slot, ValidatorStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub head_slot: Slot,
}

#[derive(Debug, thiserror::Error)]
pub enum BeaconClientError {
    #[error("beacon node unreachable: {0}")]
    TransientRemote(String),
    #[error("beacon node rejected request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait BeaconClient: Send + Sync {
    async fn sync_status(&self) -> Result<SyncStatus, BeaconClientError>;

    async fn genesis_validators_root(&self) -> Result<Hash256, BeaconClientError>;

    async fn fork_version(&self) -> Result<[u8; 4], BeaconClientError>;

    async fn duties(
        &self,
        epoch: Epoch,
        pubkeys: &[PublicKey],
    ) -> Result<DutyTable, BeaconClientError>;

    async fn produce_attestation_data(
        &self,
        slot: Slot,
        committee_index: CommitteeIndex,
    ) -> Result<AttestationData, BeaconClientError>;

    async fn publish_attestation(&self, data: AttestationData) -> Result<(), BeaconClientError>;

    /// `GetBlock` (§6): a block template's root for `slot`, built atop the given randao reveal.
    async fn produce_block_root(
        &self,
        slot: Slot,
        randao_reveal: Signature,
    ) -> Result<Hash256, BeaconClientError>;

    /// `ProposeBlock` (§6).
    async fn publish_block(
        &self,
        slot: Slot,
        block_root: Hash256,
        signature: Signature,
    ) -> Result<(), BeaconClientError>;

    /// `SubmitAggregateSelectionProof` (§4.7 phase 1): returns the aggregate root the beacon node
    /// assembled from its mempool for `(slot, committee_index)`.
    async fn submit_aggregate_selection_proof(
        &self,
        slot: Slot,
        committee_index: CommitteeIndex,
        pubkey: PublicKey,
        selection_proof: Signature,
    ) -> Result<Hash256, BeaconClientError>;

    /// `SubmitSignedAggregateSelectionProof` (§4.7 phase 2).
    async fn submit_signed_aggregate_and_proof(
        &self,
        aggregate_root: Hash256,
        signature: Signature,
    ) -> Result<(), BeaconClientError>;

    /// `WaitForActivation` (§4.4, §6): current lifecycle status for each of `pubkeys`. A pubkey
    /// absent from the response is treated as [`ValidatorStatus::Unknown`] by the caller.
    async fn activation_status(
        &self,
        pubkeys: &[PublicKey],
    ) -> Result<HashMap<PublicKey, ValidatorStatus>, BeaconClientError>;
}

/// In-memory fake used by tests and local development: fixed duties, records every publish.
pub struct FakeBeaconClient {
    pub spec: ChainSpec,
    pub genesis_validators_root: Hash256,
    pub duties: Mutex<HashMap<Epoch, DutyTable>>,
    pub published_attestations: Mutex<Vec<AttestationData>>,
    pub statuses: Mutex<HashMap<PublicKey, ValidatorStatus>>,
}

impl FakeBeaconClient {
    pub fn new(spec: ChainSpec, genesis_validators_root: Hash256) -> Self {
        Self {
            spec,
            genesis_validators_root,
            duties: Mutex::new(HashMap::new()),
            published_attestations: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_duties(&self, epoch: Epoch, table: DutyTable) {
        self.duties.lock().insert(epoch, table);
    }

    /// Sets the status a later `activation_status` call reports for `pubkey`. Keys never set
    /// here default to [`ValidatorStatus::Pending`].
    pub fn set_status(&self, pubkey: PublicKey, status: ValidatorStatus) {
        self.statuses.lock().insert(pubkey, status);
    }
}

#[async_trait]
impl BeaconClient for FakeBeaconClient {
    async fn sync_status(&self) -> Result<SyncStatus, BeaconClientError> {
        Ok(SyncStatus {
            is_syncing: false,
            head_slot: Slot::new(0),
        })
    }

    async fn genesis_validators_root(&self) -> Result<Hash256, BeaconClientError> {
        Ok(self.genesis_validators_root)
    }

    async fn fork_version(&self) -> Result<[u8; 4], BeaconClientError> {
        Ok([0; 4])
    }

    async fn duties(
        &self,
        epoch: Epoch,
        _pubkeys: &[PublicKey],
    ) -> Result<DutyTable, BeaconClientError> {
        self.duties
            .lock()
            .get(&epoch)
            .cloned()
            .ok_or_else(|| BeaconClientError::TransientRemote(format!("no duties for {epoch}")))
    }

    async fn produce_attestation_data(
        &self,
        slot: Slot,
        committee_index: CommitteeIndex,
    ) -> Result<AttestationData, BeaconClientError> {
        Ok(AttestationData {
            slot,
            committee_index,
            beacon_block_root: Hash256::zero(),
            source: Epoch::new(0),
            target: slot.epoch(self.spec.slots_per_epoch),
        })
    }

    async fn publish_attestation(&self, data: AttestationData) -> Result<(), BeaconClientError> {
        self.published_attestations.lock().push(data);
        Ok(())
    }

    async fn produce_block_root(
        &self,
        slot: Slot,
        _randao_reveal: Signature,
    ) -> Result<Hash256, BeaconClientError> {
        Ok(Hash256([slot.as_u64() as u8; 32]))
    }

    async fn publish_block(
        &self,
        _slot: Slot,
        _block_root: Hash256,
        _signature: Signature,
    ) -> Result<(), BeaconClientError> {
        Ok(())
    }

    async fn submit_aggregate_selection_proof(
        &self,
        slot: Slot,
        committee_index: CommitteeIndex,
        _pubkey: PublicKey,
        _selection_proof: Signature,
    ) -> Result<Hash256, BeaconClientError> {
        Ok(Hash256([(slot.as_u64() ^ committee_index) as u8; 32]))
    }

    async fn submit_signed_aggregate_and_proof(
        &self,
        _aggregate_root: Hash256,
        _signature: Signature,
    ) -> Result<(), BeaconClientError> {
        Ok(())
    }

    async fn activation_status(
        &self,
        pubkeys: &[PublicKey],
    ) -> Result<HashMap<PublicKey, ValidatorStatus>, BeaconClientError> {
        let statuses = self.statuses.lock();
        Ok(pubkeys
            .iter()
            .map(|pk| (*pk, statuses.get(pk).copied().unwrap_or(ValidatorStatus::Pending)))
            .collect())
    }
}
