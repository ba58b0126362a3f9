//! `DutyRunner`: the per-slot state machine that drives duty refresh and signing (§4.4).
//!
//! `Idle -> WaitingForChainStart -> WaitingForSync -> WaitingForActivation -> Running (loop) ->
//! Shutdown`. Modeled on the modern attestation-service style of one long-lived task woken by a
//! drift-free slot ticker rather than a fixed `Interval` (see `slot_clock::SlotTicker`).

use crate::beacon_client::BeaconClient;
use crate::duties_service::DutiesService;
use crate::key_manager::KeyManager;
use crate::signing::SigningPipeline;
use sha2::{Digest, Sha256};
use slot_clock::{SlotClock, SlotTicker};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use types::{ChainSpec, CommitteeIndex, Role, Signature, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    WaitingForChainStart,
    WaitingForSync,
    WaitingForActivation,
    Running,
    Shutdown,
}

/// Poll interval for an empty key set or a not-yet-activated status response (§4.4).
const KEY_REFETCH_PERIOD: Duration = Duration::from_secs(1);

/// Cap on the reconnect backoff used while polling activation status (§4.4 "same backoff as
/// above", mirrored from `WaitForChainStart`'s retry cadence).
const ACTIVATION_BACKOFF_CAP: Duration = Duration::from_secs(60);

enum ActivationOutcome {
    /// At least one pubkey reached `Active`/`Exiting`; others are picked up once `Running`
    /// refreshes duties each epoch (their status rides along on `ValidatorDuty::status`).
    Activated,
    /// The key manager's set changed mid-wait; the caller should refetch and restart.
    AccountsChanged,
}

pub struct DutyRunner<B, K, C> {
    beacon_node: Arc<B>,
    duties: Arc<DutiesService<B>>,
    signing: Arc<SigningPipeline>,
    key_manager: Arc<K>,
    clock: C,
    spec: ChainSpec,
    allow_unsynced: bool,
    /// Process-local dedup cache for aggregator submissions (§4.7): prevents resubmitting the
    /// same `(slot, committee_index)` if the runner is triggered for it more than once.
    aggregations_submitted: parking_lot::Mutex<HashSet<(Slot, CommitteeIndex)>>,
    /// Wall-clock budget given to one slot's worth of duty work (§4.4 item 1, §5 Deadline).
    slot_duration: Duration,
}

impl<B, K, C> DutyRunner<B, K, C>
where
    B: BeaconClient + 'static,
    K: KeyManager + 'static,
    C: SlotClock + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        beacon_node: Arc<B>,
        duties: Arc<DutiesService<B>>,
        signing: Arc<SigningPipeline>,
        key_manager: Arc<K>,
        clock: C,
        spec: ChainSpec,
        allow_unsynced: bool,
        slot_duration: Duration,
    ) -> Self {
        Self {
            beacon_node,
            duties,
            signing,
            key_manager,
            clock,
            spec,
            allow_unsynced,
            aggregations_submitted: parking_lot::Mutex::new(HashSet::new()),
            slot_duration,
        }
    }

    /// Drives the state machine to completion (only returns on `shutdown`).
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let clock = self.clock.clone();
        let mut state = RunnerState::Idle;
        loop {
            state = match state {
                RunnerState::Idle => RunnerState::WaitingForChainStart,
                RunnerState::WaitingForChainStart => {
                    if clock.now().is_some() {
                        RunnerState::WaitingForSync
                    } else {
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                        RunnerState::WaitingForChainStart
                    }
                }
                RunnerState::WaitingForSync => match self.beacon_node.sync_status().await {
                    Ok(status) if !status.is_syncing || self.allow_unsynced => {
                        RunnerState::WaitingForActivation
                    }
                    Ok(_) => {
                        debug!("beacon node syncing, waiting");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        RunnerState::WaitingForSync
                    }
                    Err(e) => {
                        warn!(error = %e, "beacon node unreachable while waiting for sync");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        RunnerState::WaitingForSync
                    }
                },
                RunnerState::WaitingForActivation => {
                    let pubkeys = self.key_manager.known_pubkeys();
                    if pubkeys.is_empty() {
                        tokio::time::sleep(KEY_REFETCH_PERIOD).await;
                        RunnerState::WaitingForActivation
                    } else {
                        match self.await_any_activation(&pubkeys).await {
                            ActivationOutcome::Activated => {
                                info!("validator keys activated, entering run loop");
                                RunnerState::Running
                            }
                            ActivationOutcome::AccountsChanged => RunnerState::WaitingForActivation,
                        }
                    }
                }
                RunnerState::Running => {
                    let mut ticks = SlotTicker::spawn(clock.clone(), shutdown.clone());
                    while let Some(slot) = ticks.recv().await {
                        self.clone().process_slot(slot, shutdown.clone()).await;
                    }
                    RunnerState::Shutdown
                }
                RunnerState::Shutdown => return,
            };
        }
    }

    /// Polls `activation_status` for `pubkeys` until one reaches `Active`/`Exiting`, restarting
    /// on an accounts-changed signal from the key manager (§4.4, §8 scenario 6). Reconnects on
    /// beacon-node errors with capped exponential backoff.
    async fn await_any_activation(&self, pubkeys: &[types::PublicKey]) -> ActivationOutcome {
        let mut accounts_changed = self.key_manager.subscribe_accounts_changed();
        let mut backoff = Duration::from_secs(1);
        loop {
            tokio::select! {
                changed = accounts_changed.changed() => {
                    match changed {
                        Ok(()) => return ActivationOutcome::AccountsChanged,
                        Err(_) => tokio::time::sleep(KEY_REFETCH_PERIOD).await,
                    }
                }
                status = self.beacon_node.activation_status(pubkeys) => {
                    match status {
                        Ok(statuses) => {
                            if statuses.values().any(|s| s.is_activated()) {
                                return ActivationOutcome::Activated;
                            }
                            backoff = Duration::from_secs(1);
                            tokio::time::sleep(KEY_REFETCH_PERIOD).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "activation status request failed, reconnecting");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(ACTIVATION_BACKOFF_CAP);
                        }
                    }
                }
            }
        }
    }

    /// Deadlines the slot at `slot_duration` from the point work begins (§4.4 item 1), spawns one
    /// task per `(pubkey, role)` so all duties run concurrently (§5), and joins every task before
    /// returning. Work still outstanding when the deadline fires is abandoned, not awaited
    /// further — its signature, if any, was never submitted and so was never recorded (§4.5
    /// Deadline, §7 `Deadline` kind).
    async fn process_slot(self: Arc<Self>, slot: types::Slot, shutdown: watch::Receiver<bool>) {
        let epoch = slot.epoch(self.spec.slots_per_epoch);
        let pubkeys = self.key_manager.known_pubkeys();
        if let Err(e) = self.duties.update(epoch, &pubkeys).await {
            warn!(%epoch, error = %e, "duty refresh failed, skipping slot");
            return;
        }

        let mut joins = JoinSet::new();
        for duty in self.duties.duties_at_slot(slot, self.spec.slots_per_epoch) {
            let runner = self.clone();
            let shutdown = shutdown.clone();
            joins.spawn(async move { runner.process_duty(duty, slot, shutdown).await });
        }

        match tokio::time::timeout(self.slot_duration, async {
            while joins.join_next().await.is_some() {}
        })
        .await
        {
            Ok(()) => {}
            Err(_) => {
                warn!(%slot, "slot deadline reached with duties still in flight, abandoning them");
                joins.abort_all();
            }
        }
    }

    /// Selection proof, then role resolution, then one signing+publish path per role — all for
    /// a single `(pubkey)` at `slot` (§4.4 role execution order, §4.5, §4.7).
    async fn process_duty(&self, duty: types::ValidatorDuty, slot: Slot, shutdown: watch::Receiver<bool>) {
        // Selection proof must be computed before role resolution: `is_aggregator` (§4.5,
        // §4.7) is a deterministic function of the signature itself.
        let selection_proof = if duty.attester_slot == Some(slot) {
            match self.signing.sign_selection_proof(duty.pubkey, slot).await {
                Ok(sig) => Some(sig),
                Err(e) => {
                    warn!(pubkey = %duty.pubkey, error = %e, "selection proof signing failed");
                    None
                }
            }
        } else {
            None
        };
        let is_aggregator = selection_proof
            .as_ref()
            .map(|sig| is_aggregator(sig, duty.committee_members, self.spec.target_aggregators_per_committee))
            .unwrap_or(false);

        for role in duty.roles_at(slot, is_aggregator) {
            match role {
                Role::Proposer => {
                    let epoch = slot.epoch(self.spec.slots_per_epoch);
                    match self.signing.sign_randao_reveal(duty.pubkey, epoch).await {
                        Ok(randao_reveal) => self.propose_block(duty.pubkey, slot, randao_reveal).await,
                        Err(e) => warn!(pubkey = %duty.pubkey, error = %e, "randao reveal signing failed"),
                    }
                }
                Role::Attester => self.attest(&duty, slot).await,
                Role::Aggregator => {
                    if let Some(ref proof) = selection_proof {
                        self.aggregate(&duty, slot, *proof, shutdown.clone()).await;
                    }
                }
                Role::Unknown => debug!(pubkey = %duty.pubkey, %slot, "no role this slot"),
            }
        }
    }

    async fn propose_block(&self, pubkey: types::PublicKey, slot: Slot, randao_reveal: Signature) {
        let block_root = match self.beacon_node.produce_block_root(slot, randao_reveal).await {
            Ok(root) => root,
            Err(e) => {
                warn!(%pubkey, %slot, error = %e, "failed to produce block template");
                return;
            }
        };
        match self.signing.sign_proposal(pubkey, slot, block_root).await {
            Ok(Some(signature)) => {
                if let Err(e) = self.beacon_node.publish_block(slot, block_root, signature).await {
                    warn!(%pubkey, %slot, error = %e, "block publish failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(%pubkey, %slot, error = %e, "block proposal signing failed"),
        }
    }

    async fn attest(&self, duty: &types::ValidatorDuty, slot: Slot) {
        match self
            .beacon_node
            .produce_attestation_data(slot, duty.committee_index)
            .await
        {
            Ok(data) => match self.signing.sign_attestation(duty.pubkey, &data).await {
                Ok(Some(_)) => {
                    if let Err(e) = self.beacon_node.publish_attestation(data).await {
                        warn!(pubkey = %duty.pubkey, error = %e, "attestation publish failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(pubkey = %duty.pubkey, error = %e, "attestation signing failed"),
            },
            Err(e) => warn!(%slot, error = %e, "failed to produce attestation data"),
        }
    }

    /// Two-phase aggregate submission (§4.7), guarded by the process-local dedup cache. Phase 1
    /// (the selection proof submission) is withheld until two-thirds of the way through `slot` —
    /// submitting any earlier would leak the aggregator's identity before the attestation window
    /// closes — and the wait itself can be cut short by `shutdown`.
    async fn aggregate(
        &self,
        duty: &types::ValidatorDuty,
        slot: Slot,
        selection_proof: Signature,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let key = (slot, duty.committee_index);
        if !self.aggregations_submitted.lock().insert(key) {
            debug!(pubkey = %duty.pubkey, %slot, "aggregate already submitted, skipping");
            return;
        }

        let two_thirds_delay =
            self.clock.duration_to_slot(slot).unwrap_or(Duration::ZERO) + self.clock.slot_duration() * 2 / 3;
        tokio::select! {
            _ = tokio::time::sleep(two_thirds_delay) => {}
            _ = wait_for_shutdown(&mut shutdown) => {
                debug!(pubkey = %duty.pubkey, %slot, "shutdown received while waiting to aggregate");
                self.aggregations_submitted.lock().remove(&key);
                return;
            }
        }

        let aggregate_root = match self
            .beacon_node
            .submit_aggregate_selection_proof(slot, duty.committee_index, duty.pubkey, selection_proof)
            .await
        {
            Ok(root) => root,
            Err(e) => {
                warn!(pubkey = %duty.pubkey, %slot, error = %e, "aggregate selection proof submission failed");
                self.aggregations_submitted.lock().remove(&key);
                return;
            }
        };

        match self.signing.sign_aggregate_and_proof(duty.pubkey, aggregate_root).await {
            Ok(signature) => {
                if let Err(e) = self
                    .beacon_node
                    .submit_signed_aggregate_and_proof(aggregate_root, signature)
                    .await
                {
                    // Partial failure left unspecified upstream; log and let the network observe
                    // or ignore the orphan selection proof rather than retrying.
                    warn!(pubkey = %duty.pubkey, %slot, error = %e, "signed aggregate submission failed");
                }
            }
            Err(e) => warn!(pubkey = %duty.pubkey, %slot, error = %e, "aggregate-and-proof signing failed"),
        }
    }
}

/// Resolves once `shutdown` carries `true`. If the sender side is gone, no shutdown signal can
/// ever arrive, so this just stalls forever rather than firing spuriously on the dropped channel.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// `H(sig)[0..8] mod modulo == 0` (§4.5), `modulo = max(1, committee_size / TARGET_AGGREGATORS_PER_COMMITTEE)`.
fn is_aggregator(selection_proof: &Signature, committee_members: u64, target_aggregators_per_committee: u64) -> bool {
    let modulo = std::cmp::max(1, committee_members / target_aggregators_per_committee.max(1));
    let digest = Sha256::digest(selection_proof.as_bytes());
    let value = u64::from_le_bytes(digest[0..8].try_into().expect("sha256 digest is 32 bytes"));
    value % modulo == 0
}

#[cfg(test)]
mod is_aggregator_tests {
    use super::*;

    #[test]
    fn small_committee_always_aggregates() {
        let sig = Signature::zero();
        assert!(is_aggregator(&sig, 1, 16));
    }
}
