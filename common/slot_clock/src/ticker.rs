use crate::clock::SlotClock;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};
use types::{Epoch, Slot};

/// Emits the slot number at each slot boundary (§4.1).
///
/// Ticks are delivered on a capacity-1 channel: the emitter blocks on `send` until the previous
/// tick has been consumed, so a slow consumer never has ticks coalesced away — it simply falls
/// behind and drains the backlog on its own schedule (§4.1 Ordering, reference behavior).
pub struct SlotTicker;

impl SlotTicker {
    /// Spawns the ticker task and returns the receiving end.
    ///
    /// `shutdown` halts emission within one slot interval and drops the channel, releasing the
    /// clock (§4.1 Cancellation).
    pub fn spawn<T: SlotClock + 'static>(
        clock: T,
        mut shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<Slot> {
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let Some(duration_to_next) = clock.duration_to_next_slot() else {
                debug!("slot ticker could not read clock at startup");
                return;
            };

            // §4.1: before genesis, first emission is slot 0 at genesis_time; otherwise it is the
            // next boundary, whose value is one past the slot `now()` already reports.
            let mut next_slot = match clock.now() {
                None => Slot::new(0),
                Some(current) => current + 1,
            };

            let mut deadline = Instant::now() + duration_to_next;
            let slot_duration = clock.slot_duration();

            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => {}
                    _ = shutdown.changed() => {
                        debug!("slot ticker received shutdown signal");
                        return;
                    }
                }

                trace!(slot = next_slot.as_u64(), "slot tick");
                if tx.send(next_slot).await.is_err() {
                    // Receiver dropped; nothing left to notify.
                    return;
                }

                next_slot = next_slot + 1;
                deadline += slot_duration;
            }
        });

        rx
    }
}

/// Emits the epoch number at each epoch boundary, with identical semantics to [`SlotTicker`]
/// scaled by `slots_per_epoch` (§4.1).
pub struct EpochTicker;

impl EpochTicker {
    pub fn spawn<T: SlotClock + 'static>(
        clock: T,
        slots_per_epoch: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<Epoch> {
        let (tx, rx) = mpsc::channel(1);
        let epoch_duration = clock.slot_duration() * slots_per_epoch as u32;

        tokio::spawn(async move {
            let Some(duration_to_next_slot) = clock.duration_to_next_slot() else {
                debug!("epoch ticker could not read clock at startup");
                return;
            };

            let mut next_epoch = match clock.now() {
                None => Epoch::new(0),
                Some(current) => current.epoch(slots_per_epoch) + 1,
            };

            // Align the first wakeup to the next epoch boundary, not just the next slot.
            let slots_into_epoch = clock
                .now()
                .map(|s| s.as_u64() % slots_per_epoch)
                .unwrap_or(0);
            let slots_remaining = if slots_into_epoch == 0 {
                0
            } else {
                slots_per_epoch - slots_into_epoch
            };
            let mut deadline = Instant::now()
                + duration_to_next_slot
                + clock.slot_duration() * slots_remaining as u32;

            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => {}
                    _ = shutdown.changed() => {
                        debug!("epoch ticker received shutdown signal");
                        return;
                    }
                }

                trace!(epoch = next_epoch.as_u64(), "epoch tick");
                if tx.send(next_epoch).await.is_err() {
                    return;
                }

                next_epoch = next_epoch + 1;
                deadline += epoch_duration;
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemTimeSlotClock;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[tokio::test(start_paused = true)]
    async fn ticker_emits_zero_at_genesis_then_one() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let genesis = now + Duration::from_secs(2);
        let clock = SystemTimeSlotClock::new(genesis, Duration::from_secs(1));
        let (_tx, rx) = watch::channel(false);

        let mut ticks = SlotTicker::spawn(clock, rx);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(ticks.recv().await, Some(Slot::new(0)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(ticks.recv().await, Some(Slot::new(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_halts_emission() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let clock = SystemTimeSlotClock::new(now, Duration::from_secs(1));
        let (tx, rx) = watch::channel(false);

        let mut ticks = SlotTicker::spawn(clock, rx);
        tx.send(true).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(ticks.recv().await, None);
    }
}
