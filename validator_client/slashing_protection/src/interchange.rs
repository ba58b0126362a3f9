//! EIP-3076-style interchange JSON codec (§4.3).
//!
//! A single schema, no Complete/Minimal split: every import/export round-trips the full
//! attestation and proposal history `ProtectionStore` actually has on disk.

use crate::database::ProtectionStore;
use crate::error::{InterchangeError, NotSafe};
use serde::{Deserialize, Serialize};
use types::{Epoch, Hash256, PublicKey, Slot};

pub const INTERCHANGE_FORMAT_VERSION: &str = "5";

#[derive(Debug, Serialize, Deserialize)]
pub struct InterchangeMetadata {
    pub interchange_format_version: String,
    pub genesis_validators_root: Hash256,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignedBlockData {
    pub slot: Slot,
    pub signing_root: Option<Hash256>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignedAttestationData {
    pub source_epoch: Epoch,
    pub target_epoch: Epoch,
    pub signing_root: Option<Hash256>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidatorInterchangeData {
    pub pubkey: PublicKey,
    #[serde(default)]
    pub signed_blocks: Vec<SignedBlockData>,
    #[serde(default)]
    pub signed_attestations: Vec<SignedAttestationData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Interchange {
    pub metadata: InterchangeMetadata,
    pub data: Vec<ValidatorInterchangeData>,
}

/// Imports `interchange` into `store`.
///
/// `genesis_validators_root` is adopted if the store has none yet, otherwise it must match
/// exactly (§4.3). Within a single validator's entry, later records that would be slashable
/// against an earlier record *in the same file* are dropped rather than aborting the whole
/// import, and that pubkey is added to `blacklist` for the caller to surface.
pub fn import_interchange(
    store: &ProtectionStore,
    interchange: &Interchange,
    blacklist: &mut Vec<PublicKey>,
) -> Result<(), InterchangeError> {
    if interchange.metadata.interchange_format_version != INTERCHANGE_FORMAT_VERSION {
        return Err(InterchangeError::UnsupportedVersion(
            interchange.metadata.interchange_format_version.clone(),
        ));
    }

    match store.get_genesis_validators_root()? {
        Some(existing) if existing != interchange.metadata.genesis_validators_root => {
            return Err(InterchangeError::GenesisValidatorsRootMismatch {
                file: interchange.metadata.genesis_validators_root.to_hex_string(),
                store: existing.to_hex_string(),
            });
        }
        Some(_) => {}
        None => store.set_genesis_validators_root(interchange.metadata.genesis_validators_root)?,
    }

    // §4.3 step 3: a pubkey appearing in more than one `data[]` entry is coalesced by
    // concatenating its blocks/attestations before any slashability check runs, so a conflict
    // split across two entries is caught exactly like one within a single entry.
    let mut order: Vec<PublicKey> = Vec::new();
    let mut merged: std::collections::HashMap<
        PublicKey,
        (Vec<&SignedBlockData>, Vec<&SignedAttestationData>),
    > = std::collections::HashMap::new();
    for entry in &interchange.data {
        let bucket = merged.entry(entry.pubkey).or_insert_with(|| {
            order.push(entry.pubkey);
            (Vec::new(), Vec::new())
        });
        bucket.0.extend(entry.signed_blocks.iter());
        bucket.1.extend(entry.signed_attestations.iter());
    }

    for pubkey in order {
        let (mut blocks, mut attestations) = merged.remove(&pubkey).expect("just inserted");
        blocks.sort_by_key(|b| b.slot);
        attestations.sort_by_key(|a| a.target_epoch);

        if is_entry_slashable(&pubkey, &blocks, &attestations)? {
            blacklist.push(pubkey);
            continue;
        }

        store.register_validator(&pubkey)?;
        for block in &blocks {
            if let Some(root) = block.signing_root {
                store.check_and_insert_proposal(&pubkey, root, block.slot)?;
            }
        }
        for att in &attestations {
            if let Some(root) = att.signing_root {
                store.check_and_insert_attestation(&pubkey, root, att.source_epoch, att.target_epoch)?;
            }
        }
    }

    Ok(())
}

/// Dry-runs one pubkey's sorted blocks/attestations against a scratch store to decide, up
/// front, whether *any* record in this file would be slashable against an earlier record in
/// the same file (§4.3 step 4). Nothing here touches the caller's real `store` — a slashable
/// pubkey's entire history is skipped rather than partially written (§4.3 step 5).
///
/// An absent `signing_root` is permitted but never matches anything, including another absent
/// root at the same slot/target — two blocks sharing a slot, or two attestations sharing a
/// target, are slashable unless both carry the identical present root (§4.3 edge cases).
fn is_entry_slashable(
    pubkey: &PublicKey,
    blocks: &[&SignedBlockData],
    attestations: &[&SignedAttestationData],
) -> Result<bool, InterchangeError> {
    if has_conflicting_duplicate(blocks.iter().map(|b| (b.slot.as_u64(), b.signing_root))) {
        return Ok(true);
    }
    if has_conflicting_duplicate(
        attestations
            .iter()
            .map(|a| (a.target_epoch.as_u64(), a.signing_root)),
    ) {
        return Ok(true);
    }

    // One entry per target (double-vote already ruled out above); an absent root stands in as
    // a placeholder purely for the source/target surround comparison, which ignores the root.
    let mut seen_targets = std::collections::HashSet::new();
    let scratch = ProtectionStore::open_in_memory()?;
    scratch.register_validator(pubkey)?;
    for att in attestations {
        if !seen_targets.insert(att.target_epoch) {
            continue;
        }
        let root = att.signing_root.unwrap_or(Hash256::zero());
        match scratch.check_and_insert_attestation(pubkey, root, att.source_epoch, att.target_epoch) {
            Ok(_) => {}
            Err(NotSafe::InvalidAttestation(_)) => return Ok(true),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(false)
}

/// True if any key in `items` appears more than once with non-identical (or absent) values.
fn has_conflicting_duplicate<K: Eq + std::hash::Hash>(
    items: impl Iterator<Item = (K, Option<Hash256>)>,
) -> bool {
    let mut seen: std::collections::HashMap<K, Option<Hash256>> = std::collections::HashMap::new();
    for (key, root) in items {
        match seen.get(&key) {
            None => {
                seen.insert(key, root);
            }
            Some(existing) => {
                if *existing != root || root.is_none() {
                    return true;
                }
            }
        }
    }
    false
}

/// Exports everything `store` knows, sorted by pubkey hex ascending (§4.3 export ordering).
pub fn export_interchange(
    store: &ProtectionStore,
    genesis_validators_root: Hash256,
) -> Result<Interchange, InterchangeError> {
    let mut data = Vec::new();
    for pubkey in store.list_validators()? {
        let signed_blocks = store
            .proposal_history_for_pubkey(&pubkey)?
            .into_iter()
            .map(|r| SignedBlockData {
                slot: r.slot,
                signing_root: Some(r.signing_root),
            })
            .collect();
        let signed_attestations = store
            .attestation_history_for_pubkey(&pubkey)?
            .into_iter()
            .map(|r| SignedAttestationData {
                source_epoch: r.source_epoch,
                target_epoch: r.target_epoch,
                signing_root: Some(r.signing_root),
            })
            .collect();
        data.push(ValidatorInterchangeData {
            pubkey,
            signed_blocks,
            signed_attestations,
        });
    }

    Ok(Interchange {
        metadata: InterchangeMetadata {
            interchange_format_version: INTERCHANGE_FORMAT_VERSION.to_string(),
            genesis_validators_root,
        },
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pubkey(byte: u8) -> PublicKey {
        PublicKey::from_slice(&[byte; 48]).unwrap()
    }

    #[test]
    fn round_trip_preserves_history() {
        let store = ProtectionStore::open_in_memory().unwrap();
        let pk = pubkey(1);
        store.register_validator(&pk).unwrap();
        let root = Hash256::from_slice(&[9u8; 32]).unwrap();
        store
            .check_and_insert_attestation(&pk, root, Epoch::new(0), Epoch::new(1))
            .unwrap();
        store
            .check_and_insert_proposal(&pk, root, Slot::new(10))
            .unwrap();

        let gvr = Hash256::from_slice(&[1u8; 32]).unwrap();
        let exported = export_interchange(&store, gvr).unwrap();
        assert_eq!(exported.data.len(), 1);

        let store2 = ProtectionStore::open_in_memory().unwrap();
        let mut blacklist = Vec::new();
        import_interchange(&store2, &exported, &mut blacklist).unwrap();
        assert!(blacklist.is_empty());
        assert_eq!(store2.attestation_history_for_pubkey(&pk).unwrap().len(), 1);
        assert_eq!(store2.proposal_history_for_pubkey(&pk).unwrap().len(), 1);
    }

    #[test]
    fn genesis_validators_root_mismatch_is_rejected() {
        let store = ProtectionStore::open_in_memory().unwrap();
        store
            .set_genesis_validators_root(Hash256::from_slice(&[1u8; 32]).unwrap())
            .unwrap();

        let interchange = Interchange {
            metadata: InterchangeMetadata {
                interchange_format_version: INTERCHANGE_FORMAT_VERSION.to_string(),
                genesis_validators_root: Hash256::from_slice(&[2u8; 32]).unwrap(),
            },
            data: vec![],
        };
        let mut blacklist = Vec::new();
        assert!(matches!(
            import_interchange(&store, &interchange, &mut blacklist),
            Err(InterchangeError::GenesisValidatorsRootMismatch { .. })
        ));
    }

    #[test]
    fn intra_file_double_vote_is_dropped_and_blacklisted() {
        let store = ProtectionStore::open_in_memory().unwrap();
        let pk = pubkey(4);
        let gvr = Hash256::from_slice(&[1u8; 32]).unwrap();
        let root_a = Hash256::from_slice(&[1u8; 32]).unwrap();
        let root_b = Hash256::from_slice(&[2u8; 32]).unwrap();
        let interchange = Interchange {
            metadata: InterchangeMetadata {
                interchange_format_version: INTERCHANGE_FORMAT_VERSION.to_string(),
                genesis_validators_root: gvr,
            },
            data: vec![ValidatorInterchangeData {
                pubkey: pk,
                signed_blocks: vec![],
                signed_attestations: vec![
                    SignedAttestationData {
                        source_epoch: Epoch::new(0),
                        target_epoch: Epoch::new(1),
                        signing_root: Some(root_a),
                    },
                    SignedAttestationData {
                        source_epoch: Epoch::new(0),
                        target_epoch: Epoch::new(1),
                        signing_root: Some(root_b),
                    },
                ],
            }],
        };
        let mut blacklist = Vec::new();
        import_interchange(&store, &interchange, &mut blacklist).unwrap();
        assert_eq!(blacklist, vec![pk]);
        // Entire history is skipped, not partially written (§4.3 step 5).
        assert!(store.attestation_history_for_pubkey(&pk).is_err());
    }

    #[test]
    fn block_slot_conflict_with_clean_pubkey_is_isolated() {
        let store = ProtectionStore::open_in_memory().unwrap();
        let slashable_pk = pubkey(4);
        let clean_pk = pubkey(5);
        let gvr = Hash256::from_slice(&[1u8; 32]).unwrap();
        let root_a = Hash256::from_slice(&[1u8; 32]).unwrap();
        let root_b = Hash256::from_slice(&[2u8; 32]).unwrap();
        let interchange = Interchange {
            metadata: InterchangeMetadata {
                interchange_format_version: INTERCHANGE_FORMAT_VERSION.to_string(),
                genesis_validators_root: gvr,
            },
            data: vec![
                ValidatorInterchangeData {
                    pubkey: slashable_pk,
                    signed_blocks: vec![
                        SignedBlockData {
                            slot: Slot::new(5),
                            signing_root: Some(root_a),
                        },
                        SignedBlockData {
                            slot: Slot::new(5),
                            signing_root: Some(root_b),
                        },
                    ],
                    signed_attestations: vec![],
                },
                ValidatorInterchangeData {
                    pubkey: clean_pk,
                    signed_blocks: vec![SignedBlockData {
                        slot: Slot::new(5),
                        signing_root: Some(root_a),
                    }],
                    signed_attestations: vec![],
                },
            ],
        };
        let mut blacklist = Vec::new();
        import_interchange(&store, &interchange, &mut blacklist).unwrap();
        assert_eq!(blacklist, vec![slashable_pk]);
        assert!(store.proposal_history_for_pubkey(&slashable_pk).is_err());
        assert_eq!(store.proposal_history_for_pubkey(&clean_pk).unwrap().len(), 1);
    }

    #[test]
    fn absent_signing_root_conflicts_with_present_root_at_same_target() {
        let store = ProtectionStore::open_in_memory().unwrap();
        let pk = pubkey(6);
        let gvr = Hash256::from_slice(&[1u8; 32]).unwrap();
        let root = Hash256::from_slice(&[1u8; 32]).unwrap();
        let interchange = Interchange {
            metadata: InterchangeMetadata {
                interchange_format_version: INTERCHANGE_FORMAT_VERSION.to_string(),
                genesis_validators_root: gvr,
            },
            data: vec![ValidatorInterchangeData {
                pubkey: pk,
                signed_blocks: vec![],
                signed_attestations: vec![
                    SignedAttestationData {
                        source_epoch: Epoch::new(0),
                        target_epoch: Epoch::new(1),
                        signing_root: None,
                    },
                    SignedAttestationData {
                        source_epoch: Epoch::new(0),
                        target_epoch: Epoch::new(1),
                        signing_root: Some(root),
                    },
                ],
            }],
        };
        let mut blacklist = Vec::new();
        import_interchange(&store, &interchange, &mut blacklist).unwrap();
        assert_eq!(blacklist, vec![pk]);
    }

    #[test]
    fn duplicate_pubkey_entries_are_coalesced_before_slashability_check() {
        let store = ProtectionStore::open_in_memory().unwrap();
        let pk = pubkey(7);
        let gvr = Hash256::from_slice(&[1u8; 32]).unwrap();
        let root_a = Hash256::from_slice(&[1u8; 32]).unwrap();
        let root_b = Hash256::from_slice(&[2u8; 32]).unwrap();
        // Two entries for the same pubkey, each individually clean, but a double-vote when
        // concatenated (§4.3 step 3).
        let interchange = Interchange {
            metadata: InterchangeMetadata {
                interchange_format_version: INTERCHANGE_FORMAT_VERSION.to_string(),
                genesis_validators_root: gvr,
            },
            data: vec![
                ValidatorInterchangeData {
                    pubkey: pk,
                    signed_blocks: vec![],
                    signed_attestations: vec![SignedAttestationData {
                        source_epoch: Epoch::new(0),
                        target_epoch: Epoch::new(1),
                        signing_root: Some(root_a),
                    }],
                },
                ValidatorInterchangeData {
                    pubkey: pk,
                    signed_blocks: vec![],
                    signed_attestations: vec![SignedAttestationData {
                        source_epoch: Epoch::new(0),
                        target_epoch: Epoch::new(1),
                        signing_root: Some(root_b),
                    }],
                },
            ],
        };
        let mut blacklist = Vec::new();
        import_interchange(&store, &interchange, &mut blacklist).unwrap();
        assert_eq!(blacklist, vec![pk]);
        assert!(store.attestation_history_for_pubkey(&pk).is_err());
    }
}
