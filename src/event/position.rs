use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in chain history. Positions are either epoch-granular
/// (`slot` absent) or slot-granular, and are totally ordered by
/// `(epoch, slot)` with an absent slot sorting before any slot of the
/// same epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Position {
    epoch: u64,
    slot: Option<u64>,
}

impl Position {
    /// An epoch-granular position.
    pub fn from_epoch(epoch: u64) -> Self {
        Self { epoch, slot: None }
    }

    /// A slot-granular position. The enclosing epoch is derived from the
    /// slot number and the network's slots-per-epoch ratio.
    pub fn from_slot(slot: u64, slots_per_epoch: u64) -> Self {
        let slots_per_epoch = slots_per_epoch.max(1);
        Self {
            epoch: slot / slots_per_epoch,
            slot: Some(slot),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn slot(&self) -> Option<u64> {
        self.slot
    }

    /// The natural successor: `slot + 1` for slot-granular positions,
    /// `epoch + 1` otherwise.
    pub fn next(&self, slots_per_epoch: u64) -> Self {
        match self.slot {
            Some(slot) => Self::from_slot(slot.saturating_add(1), slots_per_epoch),
            None => Self::from_epoch(self.epoch.saturating_add(1)),
        }
    }

    /// Moves the position `lag` epochs backwards, saturating at the
    /// start of the chain. Used to keep a cursor a configured distance
    /// behind the head checkpoint.
    pub fn lag_epochs(&self, lag: u64, slots_per_epoch: u64) -> Self {
        if lag == 0 {
            return *self;
        }
        match self.slot {
            Some(slot) => {
                let slots_per_epoch = slots_per_epoch.max(1);
                Self::from_slot(
                    slot.saturating_sub(lag.saturating_mul(slots_per_epoch)),
                    slots_per_epoch,
                )
            }
            None => Self::from_epoch(self.epoch.saturating_sub(lag)),
        }
    }

    /// The scalar reported to progress observers: the slot number when
    /// present, the epoch number otherwise.
    pub fn numeric(&self) -> u64 {
        self.slot.unwrap_or(self.epoch)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            Some(slot) => write!(f, "slot {} (epoch {})", slot, self.epoch),
            None => write!(f, "epoch {}", self.epoch),
        }
    }
}
