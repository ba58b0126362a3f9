use crate::fixed_bytes::{Domain, Hash256};
use crate::slot_epoch::Epoch;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The purpose a domain scopes a signature to (§4.5, GLOSSARY).
///
/// SSZ encoding and BLS signing are external collaborators (§1); `DomainKind` only carries the
/// 4-byte constant that the beacon node / consensus layer defines for each purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainKind {
    BeaconProposer,
    BeaconAttester,
    Randao,
    SelectionProof,
    AggregateAndProof,
}

impl DomainKind {
    pub const fn constant(self) -> u32 {
        match self {
            DomainKind::BeaconProposer => 0x0000_0000,
            DomainKind::BeaconAttester => 0x0000_0001,
            DomainKind::Randao => 0x0000_0002,
            DomainKind::SelectionProof => 0x0000_0005,
            DomainKind::AggregateAndProof => 0x0000_0006,
        }
    }
}

/// Derives a 32-byte domain from a fork version and a domain kind (§3 Domain).
///
/// The real beacon-chain derivation folds in `fork_version` and `genesis_validators_root` via
/// SHA-256 per the consensus spec; since SSZ/consensus hashing is an external collaborator here
/// (§1), this reproduces the same shape (fixed-size inputs, SHA-256) rather than the exact fork
/// digest algorithm.
pub fn compute_domain(kind: DomainKind, fork_version: [u8; 4], genesis_validators_root: Hash256) -> Domain {
    let mut hasher = Sha256::new();
    hasher.update(fork_version);
    hasher.update(genesis_validators_root.as_bytes());
    let fork_data_root = hasher.finalize();

    let mut out = [0u8; 32];
    out[0..4].copy_from_slice(&kind.constant().to_le_bytes());
    out[4..32].copy_from_slice(&fork_data_root[0..28]);
    Domain(out)
}

/// Combines an object's hash-tree-root with a domain to produce the root actually fed to the
/// signer (§3 SigningRoot, GLOSSARY). SSZ hash-tree-root computation itself is an external
/// collaborator (§1); callers pass in the already-computed object root.
pub fn signing_root(object_root: Hash256, domain: Domain) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(object_root.as_bytes());
    hasher.update(domain.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash256(out)
}

/// Hash-tree-root of an [`Epoch`], used by the randao-reveal signing path (§4.5) which signs a
/// byte representation of the epoch directly rather than a composite SSZ container.
pub fn epoch_signing_root(epoch: Epoch) -> Hash256 {
    let mut bytes = [0u8; 32];
    bytes[0..8].copy_from_slice(&epoch.as_u64().to_le_bytes());
    Hash256(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_is_deterministic() {
        let root = Hash256::zero();
        let a = compute_domain(DomainKind::BeaconAttester, [0; 4], root);
        let b = compute_domain(DomainKind::BeaconAttester, [0; 4], root);
        assert_eq!(a, b);
        let c = compute_domain(DomainKind::BeaconProposer, [0; 4], root);
        assert_ne!(a, c);
    }
}
