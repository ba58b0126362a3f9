//! `ProtectionStore`: the embedded slashing-protection database (§4.2).
//!
//! Backed by SQLite through a pooled, single-connection `r2d2` pool (a pool of size 1 turns
//! every access into a mutually exclusive section at the connection level, matching the
//! reference's page-level-ACID B-tree store without requiring a second lock layer here).
//! Every check and every save is wrapped in its own `EXCLUSIVE` transaction so a single call is
//! always atomic; atomicity *across* a check-then-sign-then-save sequence is the caller's job
//! (the duty runner holds a per-pubkey mutex around that sequence, see `validator_client`).

use crate::error::{InvalidAttestation, InvalidBlock, NotSafe};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, TransactionBehavior};
use std::path::Path;
use types::{Epoch, Hash256, PublicKey, Slot};

pub type Pool = r2d2::Pool<SqliteConnectionManager>;

const POOL_SIZE: u32 = 1;

/// Result of [`ProtectionStore::check_attestation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationSafety {
    NotSlashable,
    /// The exact (pubkey, target_epoch) tuple was already signed with this same root.
    SameData,
}

/// Result of [`ProtectionStore::check_proposal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalSafety {
    NotSlashable,
    SameData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationRecord {
    pub source_epoch: Epoch,
    pub target_epoch: Epoch,
    pub signing_root: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalRecord {
    pub slot: Slot,
    pub signing_root: Hash256,
}

fn hash256_from_column(bytes: &[u8], col: usize) -> rusqlite::Result<Hash256> {
    Hash256::from_slice(bytes).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Blob,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "stored signing_root is not 32 bytes",
            )),
        )
    })
}

pub struct ProtectionStore {
    pool: Pool,
}

impl ProtectionStore {
    /// Opens the database at `path`, creating it (and its schema) if absent.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self, NotSafe> {
        let exists = path.as_ref().exists();
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
            conn.pragma_update(None, "locking_mode", "EXCLUSIVE")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .build(manager)
            .map_err(NotSafe::from)?;
        let store = ProtectionStore { pool };
        if !exists {
            store.init_schema()?;
        }
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, NotSafe> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .build(manager)
            .map_err(NotSafe::from)?;
        let store = ProtectionStore { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), NotSafe> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS genesis_info (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                genesis_validators_root BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS validators (
                id INTEGER PRIMARY KEY,
                public_key TEXT NOT NULL UNIQUE
             );
             CREATE TABLE IF NOT EXISTS signed_attestations (
                validator_id INTEGER NOT NULL,
                source_epoch INTEGER NOT NULL,
                target_epoch INTEGER NOT NULL,
                signing_root BLOB NOT NULL,
                UNIQUE (validator_id, target_epoch)
             );
             CREATE TABLE IF NOT EXISTS signed_blocks (
                validator_id INTEGER NOT NULL,
                slot INTEGER NOT NULL,
                signing_root BLOB NOT NULL,
                UNIQUE (validator_id, slot)
             );
             CREATE TABLE IF NOT EXISTS lowest_bounds (
                validator_id INTEGER NOT NULL UNIQUE,
                lowest_signed_source_epoch INTEGER,
                lowest_signed_target_epoch INTEGER,
                lowest_signed_proposal_slot INTEGER,
                highest_signed_proposal_slot INTEGER
             );",
        )?;
        Ok(())
    }

    pub fn set_genesis_validators_root(&self, root: Hash256) -> Result<(), NotSafe> {
        let conn = self.pool.get()?;
        let existing: Option<Vec<u8>> = conn
            .query_row(
                "SELECT genesis_validators_root FROM genesis_info WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .ok();
        match existing {
            Some(bytes) if bytes == root.as_bytes() => Ok(()),
            Some(_) => Err(NotSafe::GenesisValidatorsRootMismatch),
            None => {
                conn.execute(
                    "INSERT INTO genesis_info (id, genesis_validators_root) VALUES (0, ?1)",
                    params![root.as_bytes()],
                )?;
                Ok(())
            }
        }
    }

    pub fn get_genesis_validators_root(&self) -> Result<Option<Hash256>, NotSafe> {
        let conn = self.pool.get()?;
        let row: Option<Vec<u8>> = conn
            .query_row(
                "SELECT genesis_validators_root FROM genesis_info WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .ok();
        row.map(|bytes| Hash256::from_slice(&bytes).map_err(NotSafe::SQLError))
            .transpose()
    }

    pub fn register_validator(&self, pubkey: &PublicKey) -> Result<(), NotSafe> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO validators (public_key) VALUES (?1)",
            params![pubkey.to_hex_string()],
        )?;
        Ok(())
    }

    /// All registered validators, sorted by hex-encoded pubkey ascending (§4.3 export ordering).
    pub fn list_validators(&self) -> Result<Vec<PublicKey>, NotSafe> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT public_key FROM validators ORDER BY public_key ASC")?;
        let rows = stmt.query_map([], |row| {
            let hex: String = row.get(0)?;
            Ok(hex)
        })?;
        let mut out = Vec::new();
        for hex in rows {
            let hex = hex?;
            out.push(PublicKey::from_hex_str(&hex).map_err(NotSafe::SQLError)?);
        }
        Ok(out)
    }

    fn validator_id(conn: &rusqlite::Connection, pubkey: &PublicKey) -> Result<i64, NotSafe> {
        conn.query_row(
            "SELECT id FROM validators WHERE public_key = ?1",
            params![pubkey.to_hex_string()],
            |row| row.get(0),
        )
        .map_err(|_| NotSafe::UnregisteredValidator(*pubkey))
    }

    /// Checks a candidate attestation against every prior vote for `pubkey` (§4.2, double-vote
    /// and surround checks). Does not write anything.
    pub fn check_attestation(
        &self,
        pubkey: &PublicKey,
        signing_root: Hash256,
        source: Epoch,
        target: Epoch,
    ) -> Result<AttestationSafety, NotSafe> {
        if source > target {
            return Err(NotSafe::InvalidAttestation(
                InvalidAttestation::SourceExceedsTarget {
                    source_epoch: source,
                    target_epoch: target,
                },
            ));
        }
        let mut conn = self.pool.get()?;
        let txn = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let validator_id = Self::validator_id(&txn, pubkey)?;
        let safety = Self::check_attestation_in_txn(&txn, validator_id, signing_root, source, target)?;
        Ok(safety)
    }

    fn check_attestation_in_txn(
        conn: &rusqlite::Connection,
        validator_id: i64,
        signing_root: Hash256,
        source: Epoch,
        target: Epoch,
    ) -> Result<AttestationSafety, NotSafe> {
        // Double vote: same target_epoch already recorded with a (possibly) different root.
        let existing_root: Option<Vec<u8>> = conn
            .query_row(
                "SELECT signing_root FROM signed_attestations
                 WHERE validator_id = ?1 AND target_epoch = ?2",
                params![validator_id, target.as_u64()],
                |row| row.get(0),
            )
            .ok();
        if let Some(bytes) = existing_root {
            return if bytes == signing_root.as_bytes() {
                Ok(AttestationSafety::SameData)
            } else {
                Err(NotSafe::InvalidAttestation(InvalidAttestation::DoubleVote {
                    target,
                }))
            };
        }

        // New surrounds an existing vote: existing.source > new.source AND existing.target < new.target.
        let surrounds_existing: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM signed_attestations
                 WHERE validator_id = ?1 AND source_epoch > ?2 AND target_epoch < ?3
                 LIMIT 1",
                params![validator_id, source.as_u64(), target.as_u64()],
                |row| row.get(0),
            )
            .ok();
        if surrounds_existing.is_some() {
            return Err(NotSafe::InvalidAttestation(InvalidAttestation::Surrounding {
                new_source: source,
                new_target: target,
            }));
        }

        // New is surrounded by an existing vote: existing.source < new.source AND existing.target > new.target.
        let surrounded_by_existing: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM signed_attestations
                 WHERE validator_id = ?1 AND source_epoch < ?2 AND target_epoch > ?3
                 LIMIT 1",
                params![validator_id, source.as_u64(), target.as_u64()],
                |row| row.get(0),
            )
            .ok();
        if surrounded_by_existing.is_some() {
            return Err(NotSafe::InvalidAttestation(InvalidAttestation::Surrounded {
                new_source: source,
                new_target: target,
            }));
        }

        Ok(AttestationSafety::NotSlashable)
    }

    /// Re-checks and persists one attestation atomically (used outside the batcher, e.g. tests
    /// and interchange import).
    pub fn check_and_insert_attestation(
        &self,
        pubkey: &PublicKey,
        signing_root: Hash256,
        source: Epoch,
        target: Epoch,
    ) -> Result<AttestationSafety, NotSafe> {
        let mut conn = self.pool.get()?;
        let txn = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let validator_id = Self::validator_id(&txn, pubkey)?;
        let safety = Self::check_attestation_in_txn(&txn, validator_id, signing_root, source, target)?;
        if safety == AttestationSafety::NotSlashable {
            Self::insert_attestation_in_txn(&txn, validator_id, signing_root, source, target)?;
        }
        txn.commit()?;
        Ok(safety)
    }

    fn insert_attestation_in_txn(
        conn: &rusqlite::Connection,
        validator_id: i64,
        signing_root: Hash256,
        source: Epoch,
        target: Epoch,
    ) -> Result<(), NotSafe> {
        conn.execute(
            "INSERT OR IGNORE INTO signed_attestations
             (validator_id, source_epoch, target_epoch, signing_root) VALUES (?1, ?2, ?3, ?4)",
            params![validator_id, source.as_u64(), target.as_u64(), signing_root.as_bytes()],
        )?;
        conn.execute(
            "INSERT INTO lowest_bounds (validator_id, lowest_signed_source_epoch, lowest_signed_target_epoch)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(validator_id) DO UPDATE SET
                lowest_signed_source_epoch = MIN(COALESCE(lowest_signed_source_epoch, ?2), ?2),
                lowest_signed_target_epoch = MIN(COALESCE(lowest_signed_target_epoch, ?3), ?3)",
            params![validator_id, source.as_u64(), target.as_u64()],
        )?;
        Ok(())
    }

    /// Saves a batch of already-checked attestation records in one transaction. Used by
    /// [`crate::AttestationBatcher`] to amortize disk writes across many signing calls (§4.2.2).
    /// Idempotent: a record already on disk is silently skipped.
    pub fn save_attestations_batch(
        &self,
        records: &[(PublicKey, Hash256, Epoch, Epoch)],
    ) -> Result<(), NotSafe> {
        let mut conn = self.pool.get()?;
        let txn = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        for (pubkey, signing_root, source, target) in records {
            let validator_id = Self::validator_id(&txn, pubkey)?;
            Self::insert_attestation_in_txn(&txn, validator_id, *signing_root, *source, *target)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn check_proposal(
        &self,
        pubkey: &PublicKey,
        signing_root: Hash256,
        slot: Slot,
    ) -> Result<ProposalSafety, NotSafe> {
        let conn = self.pool.get()?;
        let validator_id = Self::validator_id(&conn, pubkey)?;
        Self::check_proposal_in_txn(&conn, validator_id, signing_root, slot)
    }

    fn check_proposal_in_txn(
        conn: &rusqlite::Connection,
        validator_id: i64,
        signing_root: Hash256,
        slot: Slot,
    ) -> Result<ProposalSafety, NotSafe> {
        let existing_root: Option<Vec<u8>> = conn
            .query_row(
                "SELECT signing_root FROM signed_blocks WHERE validator_id = ?1 AND slot = ?2",
                params![validator_id, slot.as_u64()],
                |row| row.get(0),
            )
            .ok();
        match existing_root {
            Some(bytes) if bytes == signing_root.as_bytes() => Ok(ProposalSafety::SameData),
            Some(_) => Err(NotSafe::InvalidBlock(InvalidBlock::DoubleProposal { slot })),
            None => Ok(ProposalSafety::NotSlashable),
        }
    }

    pub fn check_and_insert_proposal(
        &self,
        pubkey: &PublicKey,
        signing_root: Hash256,
        slot: Slot,
    ) -> Result<ProposalSafety, NotSafe> {
        let mut conn = self.pool.get()?;
        let txn = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let validator_id = Self::validator_id(&txn, pubkey)?;
        let safety = Self::check_proposal_in_txn(&txn, validator_id, signing_root, slot)?;
        if safety == ProposalSafety::NotSlashable {
            txn.execute(
                "INSERT OR IGNORE INTO signed_blocks (validator_id, slot, signing_root)
                 VALUES (?1, ?2, ?3)",
                params![validator_id, slot.as_u64(), signing_root.as_bytes()],
            )?;
            txn.execute(
                "INSERT INTO lowest_bounds (validator_id, lowest_signed_proposal_slot, highest_signed_proposal_slot)
                 VALUES (?1, ?2, ?2)
                 ON CONFLICT(validator_id) DO UPDATE SET
                    lowest_signed_proposal_slot = MIN(COALESCE(lowest_signed_proposal_slot, ?2), ?2),
                    highest_signed_proposal_slot = MAX(COALESCE(highest_signed_proposal_slot, ?2), ?2)",
                params![validator_id, slot.as_u64()],
            )?;
        }
        txn.commit()?;
        Ok(safety)
    }

    pub fn attestation_history_for_pubkey(
        &self,
        pubkey: &PublicKey,
    ) -> Result<Vec<AttestationRecord>, NotSafe> {
        let conn = self.pool.get()?;
        let validator_id = Self::validator_id(&conn, pubkey)?;
        let mut stmt = conn.prepare(
            "SELECT source_epoch, target_epoch, signing_root FROM signed_attestations
             WHERE validator_id = ?1 ORDER BY target_epoch ASC",
        )?;
        let rows = stmt.query_map(params![validator_id], |row| {
            let source: u64 = row.get(0)?;
            let target: u64 = row.get(1)?;
            let root: Vec<u8> = row.get(2)?;
            Ok(AttestationRecord {
                source_epoch: Epoch::new(source),
                target_epoch: Epoch::new(target),
                signing_root: hash256_from_column(&root, 2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(NotSafe::from)
    }

    pub fn proposal_history_for_pubkey(
        &self,
        pubkey: &PublicKey,
    ) -> Result<Vec<ProposalRecord>, NotSafe> {
        let conn = self.pool.get()?;
        let validator_id = Self::validator_id(&conn, pubkey)?;
        let mut stmt = conn.prepare(
            "SELECT slot, signing_root FROM signed_blocks
             WHERE validator_id = ?1 ORDER BY slot ASC",
        )?;
        let rows = stmt.query_map(params![validator_id], |row| {
            let slot: u64 = row.get(0)?;
            let root: Vec<u8> = row.get(1)?;
            Ok(ProposalRecord {
                slot: Slot::new(slot),
                signing_root: hash256_from_column(&root, 1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(NotSafe::from)
    }

    /// Deletes attestation and proposal records older than `newest_epoch - weak_subjectivity_period`,
    /// leaving `lowest_bounds` scalars untouched (§4.2.3, §8 pruning property).
    pub fn prune_before_epoch(
        &self,
        newest_epoch: Epoch,
        weak_subjectivity_period: u64,
    ) -> Result<(), NotSafe> {
        let cutoff = newest_epoch.as_u64().saturating_sub(weak_subjectivity_period);
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM signed_attestations WHERE target_epoch <= ?1",
            params![cutoff],
        )?;
        conn.execute(
            "DELETE FROM signed_blocks WHERE slot <= ?1",
            params![cutoff.saturating_mul(32)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_validator() -> (ProtectionStore, PublicKey) {
        let store = ProtectionStore::open_in_memory().unwrap();
        let pubkey = PublicKey::from_slice(&[7u8; 48]).unwrap();
        store.register_validator(&pubkey).unwrap();
        (store, pubkey)
    }

    #[test]
    fn first_attestation_is_safe() {
        let (store, pubkey) = store_with_validator();
        let root = Hash256::from_slice(&[1u8; 32]).unwrap();
        assert_eq!(
            store
                .check_and_insert_attestation(&pubkey, root, Epoch::new(0), Epoch::new(1))
                .unwrap(),
            AttestationSafety::NotSlashable
        );
    }

    #[test]
    fn double_vote_is_rejected() {
        let (store, pubkey) = store_with_validator();
        let root_a = Hash256::from_slice(&[1u8; 32]).unwrap();
        let root_b = Hash256::from_slice(&[2u8; 32]).unwrap();
        store
            .check_and_insert_attestation(&pubkey, root_a, Epoch::new(0), Epoch::new(1))
            .unwrap();
        let err = store
            .check_and_insert_attestation(&pubkey, root_b, Epoch::new(0), Epoch::new(1))
            .unwrap_err();
        assert!(matches!(
            err,
            NotSafe::InvalidAttestation(InvalidAttestation::DoubleVote { .. })
        ));
    }

    #[test]
    fn resigning_same_root_is_same_data() {
        let (store, pubkey) = store_with_validator();
        let root = Hash256::from_slice(&[1u8; 32]).unwrap();
        store
            .check_and_insert_attestation(&pubkey, root, Epoch::new(0), Epoch::new(1))
            .unwrap();
        assert_eq!(
            store
                .check_and_insert_attestation(&pubkey, root, Epoch::new(0), Epoch::new(1))
                .unwrap(),
            AttestationSafety::SameData
        );
    }

    #[test]
    fn surrounded_vote_is_rejected() {
        let (store, pubkey) = store_with_validator();
        let root = Hash256::from_slice(&[1u8; 32]).unwrap();
        store
            .check_and_insert_attestation(&pubkey, root, Epoch::new(0), Epoch::new(3))
            .unwrap();
        let root2 = Hash256::from_slice(&[2u8; 32]).unwrap();
        let err = store
            .check_and_insert_attestation(&pubkey, root2, Epoch::new(1), Epoch::new(2))
            .unwrap_err();
        assert!(matches!(
            err,
            NotSafe::InvalidAttestation(InvalidAttestation::Surrounded { .. })
        ));
    }

    #[test]
    fn surrounding_vote_is_rejected() {
        let (store, pubkey) = store_with_validator();
        let root = Hash256::from_slice(&[1u8; 32]).unwrap();
        store
            .check_and_insert_attestation(&pubkey, root, Epoch::new(6), Epoch::new(9))
            .unwrap();
        let root2 = Hash256::from_slice(&[2u8; 32]).unwrap();
        let err = store
            .check_and_insert_attestation(&pubkey, root2, Epoch::new(0), Epoch::new(10))
            .unwrap_err();
        assert!(matches!(
            err,
            NotSafe::InvalidAttestation(InvalidAttestation::Surrounding { .. })
        ));
    }

    #[test]
    fn double_proposal_is_rejected() {
        let (store, pubkey) = store_with_validator();
        let root_a = Hash256::from_slice(&[1u8; 32]).unwrap();
        let root_b = Hash256::from_slice(&[2u8; 32]).unwrap();
        store
            .check_and_insert_proposal(&pubkey, root_a, Slot::new(100))
            .unwrap();
        let err = store
            .check_and_insert_proposal(&pubkey, root_b, Slot::new(100))
            .unwrap_err();
        assert!(matches!(
            err,
            NotSafe::InvalidBlock(InvalidBlock::DoubleProposal { .. })
        ));
    }

    #[test]
    fn unregistered_validator_is_rejected() {
        let store = ProtectionStore::open_in_memory().unwrap();
        let pubkey = PublicKey::from_slice(&[9u8; 48]).unwrap();
        let root = Hash256::from_slice(&[1u8; 32]).unwrap();
        let err = store
            .check_and_insert_proposal(&pubkey, root, Slot::new(1))
            .unwrap_err();
        assert!(matches!(err, NotSafe::UnregisteredValidator(_)));
    }

    #[test]
    fn genesis_validators_root_is_write_once() {
        let store = ProtectionStore::open_in_memory().unwrap();
        let root = Hash256::from_slice(&[5u8; 32]).unwrap();
        store.set_genesis_validators_root(root).unwrap();
        store.set_genesis_validators_root(root).unwrap();
        let other = Hash256::from_slice(&[6u8; 32]).unwrap();
        assert!(matches!(
            store.set_genesis_validators_root(other).unwrap_err(),
            NotSafe::GenesisValidatorsRootMismatch
        ));
    }

    #[test]
    fn pruning_preserves_lowest_bounds() {
        let (store, pubkey) = store_with_validator();
        let root = Hash256::from_slice(&[1u8; 32]).unwrap();
        store
            .check_and_insert_attestation(&pubkey, root, Epoch::new(0), Epoch::new(1))
            .unwrap();
        store.prune_before_epoch(Epoch::new(1000), 10).unwrap();
        assert!(store.attestation_history_for_pubkey(&pubkey).unwrap().is_empty());
    }

    #[test]
    fn pruning_cutoff_is_inclusive() {
        let (store, pubkey) = store_with_validator();
        let root = Hash256::from_slice(&[1u8; 32]).unwrap();
        store
            .check_and_insert_attestation(&pubkey, root, Epoch::new(0), Epoch::new(90))
            .unwrap();
        store.prune_before_epoch(Epoch::new(100), 10).unwrap();
        assert!(store.attestation_history_for_pubkey(&pubkey).unwrap().is_empty());
    }
}
