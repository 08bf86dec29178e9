//! Slot allocator over a raw block device
//!
//! Manages a fixed number of equally sized slots on one device and hands
//! them out to logical keys.
//!
//! # Architecture
//!
//! ```text
//! SlotTable (one Mutex)
//!   ├─→ key 7  → Slot(1)
//!   ├─→ key 12 → Slot(0)
//!   └─→ FreeList → [2, 3, 5, 4]   (pop head, push tail)
//!
//! Device layout (block_size = B):
//!   [ slot 0 | slot 1 | slot 2 | ... ]
//!   block `i` of slot `s` lives at byte s*B + i*B
//! ```
//!
//! Rewrites never overwrite in place: the key moves to a new slot and the
//! old slot goes to the tail of the free list.

pub mod aligned;
pub mod device;
pub mod engine;
pub mod free_list;
pub mod production_tests;
pub mod slot;
pub mod slot_table;
pub mod storage;

pub use aligned::AlignedBlock;
pub use device::{BlockDevice, DeviceOptions, FileDevice};
pub use engine::{AlignedIo, BlockSpan};
pub use free_list::FreeList;
pub use slot::SlotId;
pub use slot_table::{SlotSnapshot, SlotTable};
pub use storage::{SlotStats, SlotStore};
