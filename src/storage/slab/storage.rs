//! Key-addressed slot store
//!
//! Combines SlotTable + AlignedIo over one device.
//! This is the integration layer that provides the public API.

use super::device::{validate_block_size, BlockDevice, DeviceOptions, FileDevice};
use super::engine::AlignedIo;
use super::slot::SlotId;
use super::slot_table::{SlotSnapshot, SlotTable};
use crate::config::SlotStoreConfig;
use crate::error::{Error, Result};
use crate::metrics;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Sparse key → byte-range store on a fixed-block device
///
/// Keys are bound to slots of `block_size` bytes. Slot assignment lives
/// only in memory: a new store starts with every slot free, whatever the
/// device holds.
///
/// The store is `Sync`; share it by reference or behind an `Arc`. Slot
/// resolution is serialized by one lock, device transfers are not, so a
/// read racing a write on the same key sees torn data.
pub struct SlotStore<D: BlockDevice = FileDevice> {
    table: SlotTable,
    io: AlignedIo<D>,
}

impl SlotStore<FileDevice> {
    /// Open `device_path` with synchronous direct I/O
    ///
    /// # Arguments
    /// * `device_path` - Block device or file backing the store
    /// * `total_size` - Bytes to manage; `total_size / block_size` slots
    /// * `block_size` - Size of every slot and every physical transfer
    pub fn open<P: AsRef<Path>>(device_path: P, total_size: u64, block_size: u64) -> Result<Self> {
        Self::open_with_options(device_path, total_size, block_size, &DeviceOptions::default())
    }

    /// Open with explicit device options
    pub fn open_with_options<P: AsRef<Path>>(
        device_path: P,
        total_size: u64,
        block_size: u64,
        options: &DeviceOptions,
    ) -> Result<Self> {
        validate_block_size(block_size, options)?;
        let device = FileDevice::open(device_path, options)?;
        Self::with_device(device, total_size, block_size)
    }

    /// Open the store described by `config`
    pub fn from_config(config: &SlotStoreConfig) -> Result<Self> {
        config.validate()?;
        Self::open_with_options(
            &config.device_path,
            config.total_size,
            config.block_size,
            &config.device_options(),
        )
    }

    /// Close the device, reporting errors from the underlying close
    pub fn close(self) -> Result<()> {
        self.io.into_device().close()
    }
}

impl<D: BlockDevice> SlotStore<D> {
    /// Build a store on an already opened device
    pub fn with_device(device: D, total_size: u64, block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidConfig("block_size must be non-zero".to_string()));
        }
        let block_bytes = usize::try_from(block_size).map_err(|_| {
            Error::InvalidConfig(format!("block_size {} does not fit in memory", block_size))
        })?;

        let capacity = total_size / block_size;
        info!(total_size, block_size, capacity, "Initializing slot store");

        let store = Self {
            table: SlotTable::new(capacity),
            io: AlignedIo::new(device, block_bytes),
        };
        store.publish_gauges();
        Ok(store)
    }

    /// Write `buf` to `key` starting at byte `offset`
    ///
    /// Every write binds `key` to a newly allocated slot; its previous slot
    /// is recycled. Bytes of the new slot outside `[offset, offset + len)`
    /// are whatever that slot last held, possibly another key's data: the
    /// key's earlier content is not carried forward.
    ///
    /// Fails with [`Error::Exhausted`] when no slot is free (the old binding
    /// is kept) and with [`Error::Io`] when the device rejects a transfer.
    /// Blocks written before an I/O failure are not rolled back.
    pub fn write(&self, key: u64, buf: &[u8], offset: u64) -> Result<()> {
        let result = self.write_inner(key, buf, offset);
        metrics::record_operation("write", result.is_ok());
        self.publish_gauges();
        result
    }

    fn write_inner(&self, key: u64, buf: &[u8], offset: u64) -> Result<()> {
        let slot = self.table.lookup_for_write(key)?;
        debug!(key, slot = %slot, offset, len = buf.len(), "Write");
        self.io.write(slot, buf, offset)
    }

    /// Read `buf.len()` bytes of `key` starting at byte `offset`
    ///
    /// Returns the number of bytes read. Fails with [`Error::NotFound`]
    /// when `key` has never been written or was removed.
    pub fn read(&self, key: u64, buf: &mut [u8], offset: u64) -> Result<usize> {
        let result = self
            .table
            .lookup_for_read(key)
            .and_then(|slot| self.io.read(slot, buf, offset));
        metrics::record_operation("read", result.is_ok());
        result
    }

    /// Forget `key` and recycle its slot; missing keys are fine
    pub fn remove(&self, key: u64) -> Result<()> {
        if let Some(slot) = self.table.release(key) {
            debug!(key, slot = %slot, "Removed key");
        }
        metrics::record_operation("remove", true);
        self.publish_gauges();
        Ok(())
    }

    /// Slot currently bound to `key`
    pub fn slot_of(&self, key: u64) -> Option<SlotId> {
        self.table.lookup_for_read(key).ok()
    }

    /// Check if key has a slot
    pub fn contains_key(&self, key: u64) -> bool {
        self.table.contains_key(key)
    }

    /// Get number of keys
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Total number of slots
    pub fn capacity(&self) -> u64 {
        self.table.capacity()
    }

    pub fn block_size(&self) -> usize {
        self.io.block_size()
    }

    /// Consistent copy of assignments and free slots
    pub fn snapshot(&self) -> SlotSnapshot {
        self.table.snapshot()
    }

    /// Flush the device to stable storage
    pub fn flush(&self) -> Result<()> {
        self.io.flush()
    }

    /// Borrow the underlying device
    pub fn device(&self) -> &D {
        self.io.device()
    }

    /// Get slot occupancy statistics
    pub fn stats(&self) -> SlotStats {
        let (assigned_slots, free_slots) = self.table.counts();
        SlotStats {
            capacity: self.capacity(),
            block_size: self.block_size(),
            assigned_slots,
            free_slots,
        }
    }

    fn publish_gauges(&self) {
        let stats = self.stats();
        metrics::update_slot_gauges(stats.assigned_slots, stats.free_slots);
    }
}

/// Slot occupancy statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    pub capacity: u64,
    pub block_size: usize,
    pub assigned_slots: usize,
    pub free_slots: usize,
}

impl SlotStats {
    /// Fraction of slots bound to a key
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.assigned_slots as f64 / self.capacity as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MemDevice;

    const B: u64 = 4096;

    fn mem_store(slots: u64) -> SlotStore<MemDevice> {
        // Extra room so multi-block writes from the last slot stay on the device
        let device = MemDevice::new(((slots + 4) * B) as usize);
        SlotStore::with_device(device, slots * B, B).unwrap()
    }

    #[test]
    fn test_slot_store_basic() -> Result<()> {
        let store = mem_store(4);
        assert_eq!(store.capacity(), 4);
        assert!(store.is_empty());

        store.write(1, b"value1", 0)?;
        store.write(2, b"value2", 100)?;

        let mut out = [0u8; 6];
        assert_eq!(store.read(1, &mut out, 0)?, 6);
        assert_eq!(&out, b"value1");
        store.read(2, &mut out, 100)?;
        assert_eq!(&out, b"value2");

        assert!(store.contains_key(1));
        assert!(!store.contains_key(3));
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[test]
    fn test_slot_store_update() -> Result<()> {
        let store = mem_store(4);

        store.write(1, &[0x01; B as usize], 0)?;
        let first = store.slot_of(1).unwrap();
        store.write(1, &[0x02; B as usize], 0)?;
        let second = store.slot_of(1).unwrap();
        assert_ne!(first, second);

        let mut out = vec![0u8; B as usize];
        store.read(1, &mut out, 0)?;
        assert!(out.iter().all(|&b| b == 0x02));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn test_slot_store_remove() -> Result<()> {
        let store = mem_store(2);
        store.write(1, b"value1", 0)?;

        store.remove(1)?;
        store.remove(1)?;
        store.remove(42)?;

        let mut out = [0u8; 6];
        assert!(matches!(store.read(1, &mut out, 0), Err(Error::NotFound { key: 1 })));
        assert_eq!(store.stats().free_slots, 2);
        Ok(())
    }

    #[test]
    fn test_slot_store_exhaustion() -> Result<()> {
        let store = mem_store(3);
        for key in 0..3 {
            store.write(key, b"x", 0)?;
        }

        let err = store.write(100, b"x", 0).unwrap_err();
        assert!(matches!(err, Error::Exhausted { capacity: 3 }));

        store.remove(1)?;
        store.write(100, b"x", 0)?;
        assert!(store.snapshot().is_partition_of(3));
        Ok(())
    }

    #[test]
    fn test_zero_capacity_store() {
        let device = MemDevice::new(4096);
        let store = SlotStore::with_device(device, 1000, B).unwrap();
        assert_eq!(store.capacity(), 0);
        assert!(matches!(store.write(1, b"x", 0), Err(Error::Exhausted { capacity: 0 })));
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let result = SlotStore::with_device(MemDevice::new(16), 16, 0);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_length_write_still_assigns() -> Result<()> {
        let store = mem_store(2);
        store.write(9, &[], 123)?;
        assert_eq!(store.slot_of(9), Some(SlotId::new(0)));

        let mut empty = [0u8; 0];
        assert_eq!(store.read(9, &mut empty, 0)?, 0);
        Ok(())
    }

    #[test]
    fn test_slot_store_stats() -> Result<()> {
        let store = mem_store(4);
        store.write(1, b"value1", 0)?;
        store.write(2, b"value2", 0)?;

        let stats = store.stats();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.block_size, 4096);
        assert_eq!(stats.assigned_slots, 2);
        assert_eq!(stats.free_slots, 2);
        assert!((stats.utilization() - 0.5).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn test_write_cost_independent_of_capacity() -> Result<()> {
        // One-byte blocks: a million slots without a million-block device
        let store = SlotStore::with_device(MemDevice::new(4096), 1 << 20, 1)?;

        let start = std::time::Instant::now();
        for _ in 0..2000 {
            store.write(1, b"x", 0)?;
        }
        store.remove(1)?;
        let elapsed = start.elapsed();

        assert!(elapsed < std::time::Duration::from_secs(2), "took {:?}", elapsed);
        assert_eq!(store.stats().free_slots, 1 << 20);
        Ok(())
    }

    #[test]
    fn test_offset_past_address_space() -> Result<()> {
        let store = SlotStore::with_device(MemDevice::new(64), 64, 1)?;

        let err = store.write(1, b"ab", u64::MAX).unwrap_err();
        assert!(matches!(err, Error::OffsetOverflow { .. }));
        assert_eq!(store.device().write_calls(), 0);
        assert_eq!(store.device().raw(0, 2), vec![0, 0]);

        let mut out = [0u8; 2];
        let err = store.read(1, &mut out, u64::MAX).unwrap_err();
        assert!(matches!(err, Error::OffsetOverflow { .. }));
        Ok(())
    }

    #[test]
    fn test_slot_store_file_backed() -> Result<()> {
        let path = std::env::temp_dir().join(format!("slotdev_store_{}", std::process::id()));
        let options = DeviceOptions::buffered_file(8 * B);
        let store = SlotStore::open_with_options(&path, 8 * B, B, &options)?;

        let data: Vec<u8> = (0..3 * B as usize).map(|i| (i % 255) as u8).collect();
        store.write(5, &data, 777)?;
        let mut out = vec![0u8; data.len()];
        store.read(5, &mut out, 777)?;
        assert_eq!(out, data);

        store.flush()?;
        store.close()?;
        std::fs::remove_file(path).ok();
        Ok(())
    }
}
