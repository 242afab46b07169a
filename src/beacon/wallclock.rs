use crate::event::position::Position;
use std::time::{Duration, SystemTime};

/// Computes slot and epoch numbers for wall-clock instants under the
/// genesis time and slot duration of the attached network.
#[derive(Debug, Clone)]
pub struct Wallclock {
    genesis: SystemTime,
    slot_duration: Duration,
    slots_per_epoch: u64,
}

impl Wallclock {
    pub fn new(genesis: SystemTime, slot_duration: Duration, slots_per_epoch: u64) -> Self {
        Self {
            genesis,
            slot_duration: if slot_duration.is_zero() {
                Duration::from_secs(1)
            } else {
                slot_duration
            },
            slots_per_epoch: slots_per_epoch.max(1),
        }
    }

    pub fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }

    pub fn slot_duration(&self) -> Duration {
        self.slot_duration
    }

    /// Wall-clock length of one epoch.
    pub fn epoch_duration(&self) -> Duration {
        self.slot_duration
            .saturating_mul(self.slots_per_epoch.min(u64::from(u32::MAX)) as u32)
    }

    /// Slot number at the given instant, or `None` before genesis.
    pub fn slot_at(&self, instant: SystemTime) -> Option<u64> {
        let elapsed = instant.duration_since(self.genesis).ok()?;
        Some((elapsed.as_nanos() / self.slot_duration.as_nanos().max(1)) as u64)
    }

    /// The current slot-granular position, or `None` before genesis.
    pub fn now(&self) -> Option<Position> {
        let slot = self.slot_at(SystemTime::now())?;
        Some(Position::from_slot(slot, self.slots_per_epoch))
    }

    pub fn epoch_of_slot(&self, slot: u64) -> u64 {
        slot / self.slots_per_epoch
    }

    /// The wall-clock window covering the given slot.
    pub fn slot_window(&self, slot: u64) -> TimeWindow {
        let start = self.genesis + self.slot_duration.saturating_mul(slot.min(u64::from(u32::MAX)) as u32);
        TimeWindow::new(start, start + self.slot_duration)
    }

    /// The wall-clock window covering the given epoch.
    pub fn epoch_window(&self, epoch: u64) -> TimeWindow {
        let start = self.genesis
            + self
                .epoch_duration()
                .saturating_mul(epoch.min(u64::from(u32::MAX)) as u32);
        TimeWindow::new(start, start + self.epoch_duration())
    }
}

/// A half-open wall-clock interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: SystemTime,
    end: SystemTime,
}

impl TimeWindow {
    pub fn new(start: SystemTime, end: SystemTime) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> SystemTime {
        self.start
    }

    pub fn end(&self) -> SystemTime {
        self.end
    }

    pub fn active(&self) -> bool {
        let now = SystemTime::now();
        self.start <= now && now < self.end
    }

    pub fn starts_in(&self) -> Duration {
        self.start
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    pub fn ends_in(&self) -> Duration {
        self.end
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }
}
