//! Slashing-protection store: §4.2 (`ProtectionStore`, `AttestationBatcher`) and §4.3
//! (interchange import/export).

mod batcher;
mod database;
mod error;
mod interchange;

pub use batcher::{AttestationBatcher, BATCH_CAPACITY, BATCH_INTERVAL};
pub use database::{
    AttestationRecord, AttestationSafety, ProposalRecord, ProposalSafety, ProtectionStore,
};
pub use error::{InterchangeError, InvalidAttestation, InvalidBlock, NotSafe};
pub use interchange::{
    export_interchange, import_interchange, Interchange, InterchangeMetadata,
    SignedAttestationData, SignedBlockData, ValidatorInterchangeData, INTERCHANGE_FORMAT_VERSION,
};
