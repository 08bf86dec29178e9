//! Slot identifiers

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a fixed-size region on the device
///
/// Slot `n` starts at byte `n * block_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u64);

impl SlotId {
    /// Create a new slot ID
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    /// Raw slot number
    pub fn index(&self) -> u64 {
        self.0
    }

    /// Byte offset of block `block_index` of this slot.
    ///
    /// Slots are treated as extensible regions: `block_index` is not
    /// checked against the slot's own extent, only against `u64` overflow.
    pub fn block_offset(&self, block_size: u64, block_index: u64) -> Result<u64> {
        let overflow = || Error::OffsetOverflow {
            slot: self.0,
            offset: block_index.saturating_mul(block_size),
        };
        let base = self.0.checked_mul(block_size).ok_or_else(overflow)?;
        let delta = block_index.checked_mul(block_size).ok_or_else(overflow)?;
        base.checked_add(delta).ok_or_else(overflow)
    }
}

impl From<u64> for SlotId {
    fn from(index: u64) -> Self {
        Self(index)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}
