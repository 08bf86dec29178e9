//! Free slot pool

use super::slot::SlotId;
use crate::error::{Error, Result};
use std::collections::VecDeque;

/// Pool of unassigned slots
///
/// Hands slots out from the head and takes them back at the tail, so a
/// released slot is only reused after every slot freed before it.
#[derive(Debug, Clone)]
pub struct FreeList {
    /// Free slots, head first
    slots: VecDeque<SlotId>,
    /// Total number of slots this pool was created with
    capacity: u64,
}

impl FreeList {
    /// Create a pool holding every slot in `0..capacity`
    pub fn new(capacity: u64) -> Self {
        Self {
            slots: (0..capacity).map(SlotId::new).collect(),
            capacity,
        }
    }

    /// Take the slot at the head of the pool
    pub fn allocate(&mut self) -> Result<SlotId> {
        self.slots.pop_front().ok_or(Error::Exhausted {
            capacity: self.capacity,
        })
    }

    /// Return a slot to the tail of the pool
    ///
    /// The caller must not release a slot that is already free.
    pub fn release(&mut self, slot: SlotId) {
        debug_assert!(slot.index() < self.capacity, "{} out of range", slot);
        self.slots.push_back(slot);
    }

    /// Get the number of free slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total slot count, free or not
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Free slots in allocation order
    pub fn iter(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.slots.iter().copied()
    }
}
