use parking_lot::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use types::Slot;

/// Converts wall-clock time into slot numbers (§4.1 Clock & SlotTicker).
///
/// Implementations must agree with [`SlotTicker`](crate::ticker::SlotTicker) on what "now" means
/// so that a duty runner reading `now()` mid-slot and a ticker emitting that same slot boundary
/// never disagree.
pub trait SlotClock: Send + Sync + Clone {
    /// The current slot, or `None` if called before genesis.
    fn now(&self) -> Option<Slot>;

    /// How long until the start of the next slot boundary, or `None` before genesis.
    fn duration_to_next_slot(&self) -> Option<Duration>;

    /// How long until the start of `slot`. Returns `Duration::ZERO` if `slot` is in the past.
    fn duration_to_slot(&self, slot: Slot) -> Option<Duration>;

    fn slot_duration(&self) -> Duration;

    fn genesis_duration(&self) -> Duration;
}

/// The reference [`SlotClock`] implementation, backed by `SystemTime` (§4.1 Contract).
#[derive(Clone)]
pub struct SystemTimeSlotClock {
    genesis_duration: Duration,
    slot_duration: Duration,
}

impl SystemTimeSlotClock {
    pub fn new(genesis_duration: Duration, slot_duration: Duration) -> Self {
        Self {
            genesis_duration,
            slot_duration,
        }
    }

    fn now_duration(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

impl SlotClock for SystemTimeSlotClock {
    fn now(&self) -> Option<Slot> {
        let now = self.now_duration();
        let since_genesis = now.checked_sub(self.genesis_duration)?;
        Some(Slot::new(
            since_genesis.as_millis() as u64 / self.slot_duration.as_millis() as u64,
        ))
    }

    fn duration_to_next_slot(&self) -> Option<Duration> {
        let now = self.now_duration();
        if now < self.genesis_duration {
            return Some(self.genesis_duration - now);
        }
        let since_genesis = now - self.genesis_duration;
        let slot_ms = self.slot_duration.as_millis();
        let elapsed_in_slot = since_genesis.as_millis() % slot_ms;
        Some(Duration::from_millis((slot_ms - elapsed_in_slot) as u64))
    }

    fn duration_to_slot(&self, slot: Slot) -> Option<Duration> {
        let target = self.genesis_duration + self.slot_duration * slot.as_u64() as u32;
        let now = self.now_duration();
        Some(target.checked_sub(now).unwrap_or_default())
    }

    fn slot_duration(&self) -> Duration {
        self.slot_duration
    }

    fn genesis_duration(&self) -> Duration {
        self.genesis_duration
    }
}

/// A clock with a manually-advanced "now", used to drive deterministic tests of the duty runner
/// and signing pipeline without sleeping in wall-clock time.
#[derive(Clone)]
pub struct ManualSlotClock {
    inner: std::sync::Arc<RwLock<ManualState>>,
}

struct ManualState {
    slot: Option<Slot>,
    slot_duration: Duration,
}

impl ManualSlotClock {
    pub fn new(start_slot: Option<Slot>, slot_duration: Duration) -> Self {
        Self {
            inner: std::sync::Arc::new(RwLock::new(ManualState {
                slot: start_slot,
                slot_duration,
            })),
        }
    }

    pub fn set_slot(&self, slot: Slot) {
        self.inner.write().slot = Some(slot);
    }

    pub fn advance(&self) {
        let mut guard = self.inner.write();
        guard.slot = Some(guard.slot.map(|s| s + 1).unwrap_or(Slot::new(0)));
    }
}

impl SlotClock for ManualSlotClock {
    fn now(&self) -> Option<Slot> {
        self.inner.read().slot
    }

    fn duration_to_next_slot(&self) -> Option<Duration> {
        Some(Duration::from_millis(0))
    }

    fn duration_to_slot(&self, _slot: Slot) -> Option<Duration> {
        Some(Duration::from_millis(0))
    }

    fn slot_duration(&self) -> Duration {
        self.inner.read().slot_duration
    }

    fn genesis_duration(&self) -> Duration {
        Duration::from_secs(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_genesis_returns_none() {
        let genesis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            + Duration::from_secs(1000);
        let clock = SystemTimeSlotClock::new(genesis, Duration::from_secs(12));
        assert_eq!(clock.now(), None);
    }

    #[test]
    fn at_genesis_returns_zero() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let genesis = now.checked_sub(Duration::from_millis(1)).unwrap();
        let clock = SystemTimeSlotClock::new(genesis, Duration::from_secs(12));
        assert_eq!(clock.now(), Some(Slot::new(0)));
    }
}
