use types::{Epoch, PublicKey, Slot};

/// A concrete slashable condition detected by [`crate::ProtectionStore`] (§4.2 operations,
/// §7 error taxonomy `Slashable`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidAttestation {
    #[error("source epoch {source_epoch} exceeds target epoch {target_epoch}")]
    SourceExceedsTarget {
        source_epoch: Epoch,
        target_epoch: Epoch,
    },
    #[error("double vote: target epoch {target} already has a different signing root on record")]
    DoubleVote { target: Epoch },
    #[error("new attestation ({new_source}, {new_target}) surrounds an existing vote")]
    Surrounding { new_source: Epoch, new_target: Epoch },
    #[error("new attestation ({new_source}, {new_target}) is surrounded by an existing vote")]
    Surrounded { new_source: Epoch, new_target: Epoch },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidBlock {
    #[error("slot {slot} already has a different signing root on record")]
    DoubleProposal { slot: Slot },
}

/// Everything that can go wrong while consulting or mutating the slashing-protection store.
///
/// Named `NotSafe` (rather than a generic `Error`) to keep call sites reading as a safety
/// check, matching the property under test in §8: every fallible path here either blocks a
/// signature or fails closed.
#[derive(Debug, thiserror::Error)]
pub enum NotSafe {
    #[error("invalid attestation: {0}")]
    InvalidAttestation(InvalidAttestation),
    #[error("invalid block: {0}")]
    InvalidBlock(InvalidBlock),
    #[error("validator {0} is not registered with the slashing protection database")]
    UnregisteredValidator(PublicKey),
    #[error("genesis validators root already set and differs from the supplied value")]
    GenesisValidatorsRootMismatch,
    #[error("sqlite error: {0}")]
    SQLError(String),
    #[error("connection pool error: {0}")]
    SQLPoolError(String),
}

impl From<rusqlite::Error> for NotSafe {
    fn from(e: rusqlite::Error) -> Self {
        NotSafe::SQLError(e.to_string())
    }
}

impl From<r2d2::Error> for NotSafe {
    fn from(e: r2d2::Error) -> Self {
        NotSafe::SQLPoolError(e.to_string())
    }
}

/// Errors specific to importing/exporting the interchange format (§4.3).
#[derive(Debug, thiserror::Error)]
pub enum InterchangeError {
    #[error("unsupported interchange_format_version: {0}")]
    UnsupportedVersion(String),
    #[error("genesis_validators_root mismatch: file has {file}, store has {store}")]
    GenesisValidatorsRootMismatch { file: String, store: String },
    #[error(transparent)]
    NotSafe(#[from] NotSafe),
    #[error("malformed interchange JSON: {0}")]
    Malformed(String),
}
