//! Scenario tests for the slot store
//!
//! These tests drive SlotStore end to end against an in-memory device

#[cfg(test)]
mod integration {
    use crate::error::{Error, Result};
    use crate::storage::mock::MemDevice;
    use crate::storage::slab::{SlotId, SlotStore};

    const B: u64 = 4096;

    fn store(slots: u64) -> SlotStore<MemDevice> {
        // Headroom past the last slot for requests that run over
        let device = MemDevice::new(((slots + 8) * B) as usize);
        SlotStore::with_device(device, slots * B, B).unwrap()
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_rewrite_scenario() -> Result<()> {
        let store = store(4);

        store.write(7, &[0xAA; 4096], 0)?;
        assert_eq!(store.slot_of(7), Some(SlotId::new(0)));

        let mut out = vec![0u8; 4096];
        assert_eq!(store.read(7, &mut out, 0)?, 4096);
        assert!(out.iter().all(|&b| b == 0xAA));

        store.write(7, b"HELLOWORLD", 2000)?;
        assert_eq!(store.slot_of(7), Some(SlotId::new(1)));

        store.read(7, &mut out, 0)?;
        assert_eq!(&out[2000..2010], b"HELLOWORLD");
        Ok(())
    }

    #[test]
    fn test_rewrite_does_not_carry_old_content() -> Result<()> {
        let store = store(2);

        // Leave a marker in slot 1 through another key
        store.write(1, &[0x11; 4096], 0)?; // slot 0
        store.write(2, &[0x22; 4096], 0)?; // slot 1
        store.remove(2)?; // slot 1 free again, still holds 0x22

        // Key 1 moves to slot 1; bytes outside the write come from key 2
        store.write(1, b"new", 0)?;
        let mut out = vec![0u8; 4096];
        store.read(1, &mut out, 0)?;
        assert_eq!(&out[..3], b"new");
        assert!(out[3..].iter().all(|&b| b == 0x22));
        Ok(())
    }

    #[test]
    fn test_roundtrip_lengths_and_offsets() -> Result<()> {
        let store = store(16);
        let lengths = [1usize, 17, 511, 4095, 4096, 4097, 8192, 3 * 4096 + 5];
        let offsets = [0u64, 1, 2000, 4095, 4096, 5000];

        let mut key = 0u64;
        for &len in &lengths {
            for &offset in &offsets {
                let data = pattern(len, key as u8);
                store.write(key, &data, offset)?;

                let mut out = vec![0u8; len];
                assert_eq!(store.read(key, &mut out, offset)?, len);
                assert_eq!(out, data, "len={} offset={}", len, offset);

                // Keep the table from filling up
                store.remove(key)?;
                key += 1;
            }
        }
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_exhaustion_then_recovery() -> Result<()> {
        let store = store(4);
        for key in 0..4 {
            store.write(key, b"payload", 0)?;
        }

        assert!(matches!(store.write(99, b"x", 0), Err(Error::Exhausted { capacity: 4 })));
        // A rewrite of a live key needs a free slot too
        assert!(matches!(store.write(0, b"x", 0), Err(Error::Exhausted { .. })));

        let mut out = [0u8; 7];
        store.read(0, &mut out, 0)?;
        assert_eq!(&out, b"payload");

        store.remove(2)?;
        store.write(99, b"x", 0)?;
        assert_eq!(store.slot_of(99), Some(SlotId::new(2)));
        Ok(())
    }

    #[test]
    fn test_remove_idempotence() -> Result<()> {
        let store = store(2);
        store.remove(5)?;
        store.write(5, b"abc", 0)?;
        store.remove(5)?;
        store.remove(5)?;

        let mut out = [0u8; 3];
        assert!(matches!(store.read(5, &mut out, 0), Err(Error::NotFound { key: 5 })));
        Ok(())
    }

    #[test]
    fn test_fifo_reuse_order() -> Result<()> {
        let store = store(4);
        for key in 0..4 {
            store.write(key, b"x", 0)?;
        }
        store.remove(3)?;
        store.remove(0)?;

        // Slot 3 was freed first, so it is handed out first
        store.write(10, b"x", 0)?;
        store.write(11, b"x", 0)?;
        assert_eq!(store.slot_of(10), Some(SlotId::new(3)));
        assert_eq!(store.slot_of(11), Some(SlotId::new(0)));
        Ok(())
    }

    #[test]
    fn test_partition_holds_across_mixed_operations() -> Result<()> {
        let store = store(8);
        for round in 0..200u64 {
            let key = round % 11;
            match round % 3 {
                0 | 1 => match store.write(key, &pattern(100, round as u8), round * 13) {
                    Ok(()) | Err(Error::Exhausted { .. }) => {}
                    Err(e) => return Err(e),
                },
                _ => store.remove(key)?,
            }
            assert!(store.snapshot().is_partition_of(8), "round {}", round);
        }
        Ok(())
    }

    #[test]
    fn test_io_failure_surfaces_and_keeps_table_consistent() -> Result<()> {
        let store = store(4);
        store.device().fail_writes_after(0);

        let err = store.write(1, b"abc", 0).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));

        // Slot was assigned before the transfer failed
        assert!(store.contains_key(1));
        assert!(store.snapshot().is_partition_of(4));
        Ok(())
    }

    #[test]
    fn test_concurrent_writers_on_disjoint_keys() {
        let store = store(64);

        std::thread::scope(|s| {
            for t in 0..8u64 {
                let store = &store;
                s.spawn(move || {
                    for round in 0..50u64 {
                        let key = t * 4 + round % 4;
                        let data = pattern(700, (key + round) as u8);
                        let offset = (round * 97) % 3000;
                        store.write(key, &data, offset).unwrap();

                        let mut out = vec![0u8; data.len()];
                        store.read(key, &mut out, offset).unwrap();
                        assert_eq!(out, data);
                    }
                });
            }
        });

        assert_eq!(store.len(), 32);
        assert!(store.snapshot().is_partition_of(64));
    }
}
