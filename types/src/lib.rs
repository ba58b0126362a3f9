//! Core data model shared across the validator client (§3): slots/epochs, the fixed-size
//! hex-encoded primitives used by the interchange format, signature domains, duties, and the
//! immutable `ChainSpec`.
//!
//! SSZ encoding, BLS signing, and the consensus state transition are external collaborators
//! (§1); this crate only defines the field-level shapes the slashing-protection and duty-runner
//! logic needs (§9 DESIGN NOTES: "deep protobuf-generated state types").

mod chain_spec;
mod domain;
mod duty;
mod fixed_bytes;
mod slot_epoch;

pub use chain_spec::{ssz_limits, ChainSpec};
pub use domain::{compute_domain, epoch_signing_root, signing_root, DomainKind};
pub use duty::{DutyTable, Role, ValidatorDuty, ValidatorStatus};
pub use fixed_bytes::{Domain, Hash256, PublicKey, Signature};
pub use slot_epoch::{Epoch, Slot};

/// Index of a committee within a slot; the consensus layer defines its range relative to
/// committee count per slot, tracked here only as an opaque `u64` (§1: SSZ/consensus internals
/// are external collaborators).
pub type CommitteeIndex = u64;

/// An attestation vote `(source_epoch, target_epoch)` plus the digest fed to the signer
/// (GLOSSARY: Attestation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttestationData {
    pub slot: Slot,
    pub committee_index: CommitteeIndex,
    pub source: Epoch,
    pub target: Epoch,
    pub beacon_block_root: Hash256,
}
