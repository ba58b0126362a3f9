//! `AttestationBatcher`: amortizes the per-signature disk write behind a bounded channel (§4.2.2).
//!
//! Modeled on the modern `attestation_service.rs` style of spawning one long-lived background
//! task per duty stream: a single `tokio::spawn`ed loop owns the database handle and the
//! in-flight batch, responding to each submitter over its own oneshot channel so callers can
//! still await durability before releasing a signature.

use crate::database::ProtectionStore;
use crate::error::NotSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use types::{Epoch, Hash256, PublicKey};

pub const BATCH_CAPACITY: usize = 2048;
pub const BATCH_INTERVAL: Duration = Duration::from_millis(100);

struct BatchItem {
    pubkey: PublicKey,
    signing_root: Hash256,
    source: Epoch,
    target: Epoch,
    respond_to: oneshot::Sender<Result<(), NotSafe>>,
}

/// Handle to the background flush task. Cloning shares the same channel and worker.
#[derive(Clone)]
pub struct AttestationBatcher {
    tx: mpsc::Sender<BatchItem>,
}

impl AttestationBatcher {
    pub fn spawn(store: Arc<ProtectionStore>) -> Self {
        let (tx, rx) = mpsc::channel(BATCH_CAPACITY);
        tokio::spawn(Self::run(store, rx));
        AttestationBatcher { tx }
    }

    /// Queues an already-checked attestation for durable storage, resolving once the batch
    /// containing it has committed (or failed).
    pub async fn submit(
        &self,
        pubkey: PublicKey,
        signing_root: Hash256,
        source: Epoch,
        target: Epoch,
    ) -> Result<(), NotSafe> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(BatchItem {
                pubkey,
                signing_root,
                source,
                target,
                respond_to,
            })
            .await
            .map_err(|_| NotSafe::SQLError("attestation batcher worker has shut down".into()))?;
        response
            .await
            .map_err(|_| NotSafe::SQLError("attestation batcher dropped the response".into()))?
    }

    async fn run(store: Arc<ProtectionStore>, mut rx: mpsc::Receiver<BatchItem>) {
        let mut pending: Vec<BatchItem> = Vec::with_capacity(BATCH_CAPACITY);
        loop {
            tokio::select! {
                biased;
                item = rx.recv() => {
                    match item {
                        Some(item) => {
                            pending.push(item);
                            if pending.len() >= BATCH_CAPACITY {
                                Self::flush(&store, &mut pending);
                            }
                        }
                        None => {
                            if !pending.is_empty() {
                                Self::flush(&store, &mut pending);
                            }
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep(BATCH_INTERVAL), if !pending.is_empty() => {
                    Self::flush(&store, &mut pending);
                }
            }
        }
    }

    fn flush(store: &Arc<ProtectionStore>, pending: &mut Vec<BatchItem>) {
        let records: Vec<_> = pending
            .iter()
            .map(|item| (item.pubkey, item.signing_root, item.source, item.target))
            .collect();
        let result = store.save_attestations_batch(&records);
        for item in pending.drain(..) {
            let outcome = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(NotSafe::SQLError(e.to_string())),
            };
            let _ = item.respond_to.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pubkey(byte: u8) -> PublicKey {
        PublicKey::from_slice(&[byte; 48]).unwrap()
    }

    #[tokio::test]
    async fn submitted_attestation_becomes_queryable() {
        let store = Arc::new(ProtectionStore::open_in_memory().unwrap());
        let pk = pubkey(1);
        store.register_validator(&pk).unwrap();
        let batcher = AttestationBatcher::spawn(store.clone());

        let root = Hash256::from_slice(&[2u8; 32]).unwrap();
        batcher
            .submit(pk, root, Epoch::new(0), Epoch::new(1))
            .await
            .unwrap();

        let history = store.attestation_history_for_pubkey(&pk).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].target_epoch, Epoch::new(1));
    }

    #[tokio::test]
    async fn many_submissions_flush_in_one_batch_capacity_trigger() {
        let store = Arc::new(ProtectionStore::open_in_memory().unwrap());
        let pk = pubkey(3);
        store.register_validator(&pk).unwrap();
        let batcher = AttestationBatcher::spawn(store.clone());

        let mut handles = Vec::new();
        for i in 0..50u64 {
            let batcher = batcher.clone();
            let root = Hash256::from_slice(&[i as u8; 32]).unwrap();
            handles.push(tokio::spawn(async move {
                batcher
                    .submit(pk, root, Epoch::new(i), Epoch::new(i + 1))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(store.attestation_history_for_pubkey(&pk).unwrap().len(), 50);
    }
}
