//! Signing pipeline (§4.5): pre-sign slashing check, sign, post-sign durable save. A signature
//! must never leave this process before the record of having produced it is flushed to the
//! slashing-protection store.

use crate::key_manager::{KeyManager, KeyManagerError};
use slashing_protection::{AttestationBatcher, NotSafe, ProtectionStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use types::{AttestationData, ChainSpec, DomainKind, Hash256, PublicKey, Signature};

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("slashable: {0}")]
    Slashable(#[from] NotSafe),
    #[error("key manager: {0}")]
    KeyUnavailable(#[from] KeyManagerError),
}

/// Guards the (check -> sign -> save) critical section per pubkey (§4.2.1): the store itself
/// only makes each individual check or save atomic, so the cross-operation atomicity for a
/// single validator's signing sequence is enforced here.
#[derive(Default)]
pub struct PubkeyLocks {
    locks: parking_lot::Mutex<HashMap<PublicKey, Arc<AsyncMutex<()>>>>,
}

impl PubkeyLocks {
    fn lock_for(&self, pubkey: &PublicKey) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(*pubkey)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub struct SigningPipeline {
    store: Arc<ProtectionStore>,
    batcher: AttestationBatcher,
    key_manager: Arc<dyn KeyManager>,
    locks: PubkeyLocks,
    spec: ChainSpec,
    genesis_validators_root: Hash256,
}

impl SigningPipeline {
    pub fn new(
        store: Arc<ProtectionStore>,
        key_manager: Arc<dyn KeyManager>,
        spec: ChainSpec,
        genesis_validators_root: Hash256,
    ) -> Self {
        let batcher = AttestationBatcher::spawn(store.clone());
        Self {
            store,
            batcher,
            key_manager,
            locks: PubkeyLocks::default(),
            spec,
            genesis_validators_root,
        }
    }

    /// Signs a single attestation for `pubkey`, or returns `Ok(None)` if the attestation would
    /// be slashable (the caller treats this as "skip this validator", not a hard failure).
    pub async fn sign_attestation(
        &self,
        pubkey: PublicKey,
        data: &AttestationData,
    ) -> Result<Option<Signature>, SigningError> {
        let lock = self.locks.lock_for(&pubkey);
        let _guard = lock.lock().await;

        let object_root = attestation_object_root(data);
        let domain = types::compute_domain(
            DomainKind::BeaconAttester,
            self.spec.fork_version,
            self.genesis_validators_root,
        );
        let signing_root = types::signing_root(object_root, domain);

        match self
            .store
            .check_attestation(&pubkey, signing_root, data.source, data.target)
        {
            Ok(_) => {}
            Err(NotSafe::InvalidAttestation(reason)) => {
                lighthouse_metrics::inc_counter(&crate::metrics::SLASHABLE_ATTESTATIONS_TOTAL);
                warn!(%pubkey, %reason, "refusing to sign slashable attestation");
                return Ok(None);
            }
            Err(e) => {
                lighthouse_metrics::inc_counter(&crate::metrics::STORE_CORRUPTION_TOTAL);
                return Err(e.into());
            }
        }

        let signature = self.key_manager.sign(&pubkey, signing_root, domain).await?;

        self.batcher
            .submit(pubkey, signing_root, data.source, data.target)
            .await?;

        debug!(%pubkey, target = %data.target, "signed attestation");
        Ok(Some(signature))
    }

    /// Signs a block proposal at `slot`, guarded by the same per-pubkey critical section.
    pub async fn sign_proposal(
        &self,
        pubkey: PublicKey,
        slot: types::Slot,
        block_root: Hash256,
    ) -> Result<Option<Signature>, SigningError> {
        let lock = self.locks.lock_for(&pubkey);
        let _guard = lock.lock().await;

        let domain = types::compute_domain(
            DomainKind::BeaconProposer,
            self.spec.fork_version,
            self.genesis_validators_root,
        );
        let signing_root = types::signing_root(block_root, domain);

        match self.store.check_and_insert_proposal(&pubkey, signing_root, slot) {
            Ok(_) => {}
            Err(NotSafe::InvalidBlock(reason)) => {
                lighthouse_metrics::inc_counter(&crate::metrics::SLASHABLE_PROPOSALS_TOTAL);
                warn!(%pubkey, %reason, "refusing to sign slashable block proposal");
                return Ok(None);
            }
            Err(e) => {
                lighthouse_metrics::inc_counter(&crate::metrics::STORE_CORRUPTION_TOTAL);
                return Err(e.into());
            }
        }

        let signature = self.key_manager.sign(&pubkey, signing_root, domain).await?;
        debug!(%pubkey, %slot, "signed block proposal");
        Ok(Some(signature))
    }

    /// Signs a RANDAO reveal for `epoch` (§4.5); not slashable, so no store interaction.
    pub async fn sign_randao_reveal(
        &self,
        pubkey: PublicKey,
        epoch: types::Epoch,
    ) -> Result<Signature, SigningError> {
        let domain = types::compute_domain(
            DomainKind::Randao,
            self.spec.fork_version,
            self.genesis_validators_root,
        );
        let signing_root = types::signing_root(types::epoch_signing_root(epoch), domain);
        Ok(self.key_manager.sign(&pubkey, signing_root, domain).await?)
    }

    /// Signs a selection proof for `slot` (§4.5, §4.7); not slashable.
    pub async fn sign_selection_proof(
        &self,
        pubkey: PublicKey,
        slot: types::Slot,
    ) -> Result<Signature, SigningError> {
        let domain = types::compute_domain(
            DomainKind::SelectionProof,
            self.spec.fork_version,
            self.genesis_validators_root,
        );
        let mut bytes = [0u8; 32];
        bytes[0..8].copy_from_slice(&slot.as_u64().to_le_bytes());
        let signing_root = types::signing_root(Hash256(bytes), domain);
        Ok(self.key_manager.sign(&pubkey, signing_root, domain).await?)
    }

    /// Signs an aggregate-and-proof envelope (§4.5, §4.7); not itself slashable — the underlying
    /// attestation inside it was already checked and signed via [`Self::sign_attestation`].
    pub async fn sign_aggregate_and_proof(
        &self,
        pubkey: PublicKey,
        aggregate_root: Hash256,
    ) -> Result<Signature, SigningError> {
        let domain = types::compute_domain(
            DomainKind::AggregateAndProof,
            self.spec.fork_version,
            self.genesis_validators_root,
        );
        let signing_root = types::signing_root(aggregate_root, domain);
        Ok(self.key_manager.sign(&pubkey, signing_root, domain).await?)
    }
}

fn attestation_object_root(data: &AttestationData) -> Hash256 {
    let mut bytes = [0u8; 32];
    bytes[0..8].copy_from_slice(&data.slot.as_u64().to_le_bytes());
    bytes[8..16].copy_from_slice(&data.source.as_u64().to_le_bytes());
    bytes[16..24].copy_from_slice(&data.target.as_u64().to_le_bytes());
    let tail = data.beacon_block_root.as_bytes();
    bytes[24..32].copy_from_slice(&tail[0..8]);
    Hash256(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_manager::LocalKeyManager;
    use types::{Epoch, Slot};

    fn pipeline(pubkeys: Vec<PublicKey>) -> SigningPipeline {
        let store = Arc::new(ProtectionStore::open_in_memory().unwrap());
        for pk in &pubkeys {
            store.register_validator(pk).unwrap();
        }
        let km = Arc::new(LocalKeyManager::new(pubkeys));
        SigningPipeline::new(store, km, ChainSpec::mainnet(), Hash256::zero())
    }

    #[tokio::test]
    async fn signs_first_attestation() {
        let pk = PublicKey::from_slice(&[1u8; 48]).unwrap();
        let pipeline = pipeline(vec![pk]);
        let data = AttestationData {
            slot: Slot::new(1),
            committee_index: 0,
            source: Epoch::new(0),
            target: Epoch::new(1),
            beacon_block_root: Hash256::zero(),
        };
        let sig = pipeline.sign_attestation(pk, &data).await.unwrap();
        assert!(sig.is_some());
    }

    #[tokio::test]
    async fn refuses_double_vote() {
        let pk = PublicKey::from_slice(&[1u8; 48]).unwrap();
        let pipeline = pipeline(vec![pk]);
        let data = AttestationData {
            slot: Slot::new(1),
            committee_index: 0,
            source: Epoch::new(0),
            target: Epoch::new(1),
            beacon_block_root: Hash256::zero(),
        };
        pipeline.sign_attestation(pk, &data).await.unwrap();

        let mut conflicting = data;
        conflicting.beacon_block_root = Hash256([9u8; 32]);
        let sig = pipeline.sign_attestation(pk, &conflicting).await.unwrap();
        assert!(sig.is_none());
    }

    #[tokio::test]
    async fn refuses_double_proposal() {
        let pk = PublicKey::from_slice(&[1u8; 48]).unwrap();
        let pipeline = pipeline(vec![pk]);
        let sig = pipeline
            .sign_proposal(pk, Slot::new(5), Hash256([1u8; 32]))
            .await
            .unwrap();
        assert!(sig.is_some());

        let sig2 = pipeline
            .sign_proposal(pk, Slot::new(5), Hash256([2u8; 32]))
            .await
            .unwrap();
        assert!(sig2.is_none());
    }
}
