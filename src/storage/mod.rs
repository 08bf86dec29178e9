//! Storage layer
//!
//! # Architecture
//!
//! slotdev treats a raw block device as a sparse, key-addressed store:
//!
//! ```text
//! SlotStore
//!   ├─→ SlotTable (Mutex)
//!   │     ├─→ index:     key → SlotId
//!   │     └─→ free list: [3, 4, 5, ...] (FIFO)
//!   └─→ AlignedIo
//!         └─→ BlockDevice (pread/pwrite at slot * block_size + block_index * block_size)
//! ```
//!
//! ## Implementation
//!
//! - **Slot Table** maps logical keys to slots; every write rebinds the key
//!   to a freshly allocated slot and recycles the old one.
//! - **Aligned I/O** splits arbitrary byte ranges into whole-block transfers,
//!   using read-modify-write for partially covered blocks.
//! - **Device** is a trait so the engine can run against a real device file
//!   or the in-memory [`MemDevice`] used by the tests.
//!
//! Nothing is persisted besides the caller's bytes: a new [`SlotStore`]
//! always starts with an empty table and every slot free.

pub mod mock;
pub mod slab;

pub use mock::MemDevice;
pub use slab::{
    AlignedIo, BlockDevice, DeviceOptions, FileDevice, FreeList, SlotId, SlotSnapshot, SlotStats,
    SlotStore, SlotTable,
};
