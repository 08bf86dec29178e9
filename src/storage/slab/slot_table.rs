//! Key → slot index
//!
//! One mutex guards both the index and the free list, so every lookup,
//! allocation and release sees a consistent pair:
//!
//! ```text
//! lookup_for_write(7):
//!   lock
//!   new = free.pop_front()        ← Exhausted? unlock, nothing changed
//!   old = index.insert(7, new)
//!   free.push_back(old)           ← only if 7 was bound
//!   unlock
//! ```
//!
//! Device I/O never happens while the lock is held.

use super::free_list::FreeList;
use super::slot::SlotId;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug)]
struct SlotState {
    index: HashMap<u64, SlotId>,
    free: FreeList,
}

/// Thread-safe mapping from logical key to assigned slot
#[derive(Debug)]
pub struct SlotTable {
    state: Mutex<SlotState>,
    capacity: u64,
}

/// Consistent copy of the table, taken under the lock
#[derive(Debug, Clone, Default)]
pub struct SlotSnapshot {
    /// (key, slot) pairs, sorted by key
    pub assigned: Vec<(u64, SlotId)>,
    /// Free slots in allocation order
    pub free: Vec<SlotId>,
}

impl SlotTable {
    /// Create an empty table with every slot in `0..capacity` free
    pub fn new(capacity: u64) -> Self {
        Self {
            state: Mutex::new(SlotState {
                index: HashMap::new(),
                free: FreeList::new(capacity),
            }),
            capacity,
        }
    }

    /// Resolve the slot currently bound to `key`
    pub fn lookup_for_read(&self, key: u64) -> Result<SlotId> {
        let state = self.state.lock();
        state.index.get(&key).copied().ok_or_else(|| {
            debug!(key, "No slot assigned");
            Error::NotFound { key }
        })
    }

    /// Bind `key` to a freshly allocated slot
    ///
    /// A key that already had a slot is moved to the new one and its old
    /// slot goes back to the tail of the free list. If no slot is free the
    /// table is left untouched and the old binding stays readable.
    pub fn lookup_for_write(&self, key: u64) -> Result<SlotId> {
        let mut state = self.state.lock();

        let slot = match state.free.allocate() {
            Ok(slot) => slot,
            Err(e) => {
                warn!(key, capacity = self.capacity, "No free slot for write");
                return Err(e);
            }
        };

        match state.index.insert(key, slot) {
            Some(old) => {
                state.free.release(old);
                debug!(key, old = %old, new = %slot, "Reassigned slot");
            }
            None => debug!(key, slot = %slot, "Assigned slot"),
        }

        Ok(slot)
    }

    /// Drop `key`'s binding and recycle its slot
    ///
    /// Returns the released slot, or `None` when the key had none.
    pub fn release(&self, key: u64) -> Option<SlotId> {
        let mut state = self.state.lock();
        let slot = state.index.remove(&key)?;
        state.free.release(slot);
        debug!(key, slot = %slot, "Released slot");
        Some(slot)
    }

    /// Check whether `key` currently has a slot
    pub fn contains_key(&self, key: u64) -> bool {
        self.state.lock().index.contains_key(&key)
    }

    /// Number of assigned keys
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().index.is_empty()
    }

    /// Number of free slots
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Total number of slots
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Assigned and free slot counts, read under one lock
    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.index.len(), state.free.len())
    }

    /// Copy out the full table and free list in one critical section
    ///
    /// Linear in capacity; meant for consistency checks, not hot paths.
    pub fn snapshot(&self) -> SlotSnapshot {
        let state = self.state.lock();
        let mut assigned: Vec<_> = state.index.iter().map(|(&k, &s)| (k, s)).collect();
        assigned.sort_unstable_by_key(|&(key, _)| key);
        SlotSnapshot {
            assigned,
            free: state.free.iter().collect(),
        }
    }
}

impl SlotSnapshot {
    /// Check that assigned and free slots partition `0..capacity`
    pub fn is_partition_of(&self, capacity: u64) -> bool {
        let mut seen = vec![false; capacity as usize];
        let all = self
            .assigned
            .iter()
            .map(|&(_, slot)| slot)
            .chain(self.free.iter().copied());

        for slot in all {
            match seen.get_mut(slot.index() as usize) {
                Some(mark) if !*mark => *mark = true,
                _ => return false,
            }
        }
        seen.into_iter().all(|mark| mark)
    }
}
