//! `KeyManager`: the signing capability the duty runner consumes (§4.6).
//!
//! Real BLS key custody (local keystores, remote signer protocols) is an external collaborator
//! per scope; this module defines the trait boundary and a simple in-process implementation
//! good enough for tests and local development.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::watch;
use types::{Domain, Hash256, PublicKey, Signature};

#[derive(Debug, thiserror::Error)]
pub enum KeyManagerError {
    #[error("no key available for pubkey {0}")]
    UnknownPubkey(PublicKey),
    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Capability to produce a signature over a signing root, without exposing key material.
#[async_trait]
pub trait KeyManager: Send + Sync {
    async fn sign(
        &self,
        pubkey: &PublicKey,
        signing_root: Hash256,
        domain: Domain,
    ) -> Result<Signature, KeyManagerError>;

    fn known_pubkeys(&self) -> Vec<PublicKey>;

    /// Fires whenever the managed key set changes (a key added, removed, or re-imported). The
    /// duty runner subscribes to this to restart its activation wait with the new set (§4.6).
    fn subscribe_accounts_changed(&self) -> watch::Receiver<()>;
}

/// Deterministic, non-cryptographic stand-in signer: hashes `(pubkey, signing_root, domain)`
/// into a fixed-size signature. Sufficient for driving the duty runner and slashing-protection
/// logic end to end in tests; never to be used against a live network.
pub struct LocalKeyManager {
    keys: parking_lot::RwLock<HashMap<PublicKey, ()>>,
    accounts_changed: watch::Sender<()>,
}

impl LocalKeyManager {
    pub fn new(pubkeys: Vec<PublicKey>) -> Self {
        Self {
            keys: parking_lot::RwLock::new(pubkeys.into_iter().map(|k| (k, ())).collect()),
            accounts_changed: watch::channel(()).0,
        }
    }

    /// Adds a pubkey to the managed set and notifies subscribers. A no-op for an already-known
    /// key (no spurious accounts-changed event).
    pub fn add_pubkey(&self, pubkey: PublicKey) {
        if self.keys.write().insert(pubkey, ()).is_none() {
            let _ = self.accounts_changed.send(());
        }
    }
}

#[async_trait]
impl KeyManager for LocalKeyManager {
    async fn sign(
        &self,
        pubkey: &PublicKey,
        signing_root: Hash256,
        domain: Domain,
    ) -> Result<Signature, KeyManagerError> {
        if !self.keys.read().contains_key(pubkey) {
            return Err(KeyManagerError::UnknownPubkey(*pubkey));
        }
        let mut preimage = Vec::with_capacity(
            PublicKey::LENGTH + Hash256::LENGTH + Domain::LENGTH,
        );
        preimage.extend_from_slice(pubkey.as_bytes());
        preimage.extend_from_slice(signing_root.as_bytes());
        preimage.extend_from_slice(domain.as_bytes());
        let digest = Sha256::digest(&preimage);
        let mut sig_bytes = [0u8; Signature::LENGTH];
        for (i, byte) in sig_bytes.iter_mut().enumerate() {
            *byte = digest[i % digest.len()];
        }
        Ok(Signature(sig_bytes))
    }

    fn known_pubkeys(&self) -> Vec<PublicKey> {
        self.keys.read().keys().cloned().collect()
    }

    fn subscribe_accounts_changed(&self) -> watch::Receiver<()> {
        self.accounts_changed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signs_known_key_deterministically() {
        let pk = PublicKey::from_slice(&[1u8; 48]).unwrap();
        let km = LocalKeyManager::new(vec![pk]);
        let root = Hash256::from_slice(&[2u8; 32]).unwrap();
        let domain = Domain::zero();
        let sig_a = km.sign(&pk, root, domain).await.unwrap();
        let sig_b = km.sign(&pk, root, domain).await.unwrap();
        assert_eq!(sig_a, sig_b);
    }

    #[tokio::test]
    async fn rejects_unknown_key() {
        let km = LocalKeyManager::new(vec![]);
        let pk = PublicKey::from_slice(&[9u8; 48]).unwrap();
        let root = Hash256::zero();
        let err = km.sign(&pk, root, Domain::zero()).await.unwrap_err();
        assert!(matches!(err, KeyManagerError::UnknownPubkey(_)));
    }

    #[tokio::test]
    async fn add_pubkey_notifies_subscribers() {
        let km = LocalKeyManager::new(vec![]);
        let mut rx = km.subscribe_accounts_changed();
        let pk = PublicKey::from_slice(&[3u8; 48]).unwrap();

        km.add_pubkey(pk);

        rx.changed().await.unwrap();
        assert_eq!(km.known_pubkeys(), vec![pk]);
    }
}
