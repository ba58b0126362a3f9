use serde::{Deserialize, Serialize};

/// SSZ list-cap and fixed-size constants that must be preserved bit-exact even though the SSZ
/// codec itself is an external collaborator (§1, §9 DESIGN NOTES).
pub mod ssz_limits {
    pub const MAX_PROPOSER_SLASHINGS: usize = 16;
    pub const MAX_ATTESTER_SLASHINGS: usize = 2;
    pub const MAX_ATTESTATIONS: usize = 128;
    pub const MAX_DEPOSITS: usize = 16;
    pub const MAX_VOLUNTARY_EXITS: usize = 16;
    pub const SIGNATURE_BYTES: usize = 96;
    pub const ROOT_BYTES: usize = 32;
    pub const COMMITTEE_BITS_BYTES: usize = 64;
    pub const SYNC_SIGNATURE_BYTES: usize = 96;
}

/// Immutable chain-wide configuration, threaded explicitly through construction rather than
/// held as process-wide global state (§9 DESIGN NOTES: "Singleton global config").
///
/// Grounded on the `target_committee_size` / time-parameter section of a mainnet `ChainSpec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSpec {
    pub slots_per_epoch: u64,
    pub seconds_per_slot: u64,
    pub genesis_time: u64,
    pub target_aggregators_per_committee: u64,
    /// Epochs of slashing-protection history retained before pruning (§4.2.3).
    pub weak_subjectivity_period: u64,
    pub fork_version: [u8; 4],
}

impl ChainSpec {
    pub fn mainnet() -> Self {
        Self {
            slots_per_epoch: 32,
            seconds_per_slot: 12,
            genesis_time: 1_606_824_023,
            target_aggregators_per_committee: 16,
            weak_subjectivity_period: 54_000,
            fork_version: [0; 4],
        }
    }

    pub fn minimal() -> Self {
        Self {
            slots_per_epoch: 8,
            seconds_per_slot: 6,
            weak_subjectivity_period: 54_000,
            ..Self::mainnet()
        }
    }
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self::mainnet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_spec_can_be_constructed() {
        let spec = ChainSpec::mainnet();
        assert_eq!(spec.slots_per_epoch, 32);
    }
}
