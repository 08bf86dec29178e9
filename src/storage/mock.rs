//! In-memory device for testing
//!
//! Behaves like a zero-filled device of fixed length and can be told to
//! fail reads or writes after a number of successful calls.

use crate::storage::slab::BlockDevice;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// In-memory block device
#[derive(Debug)]
pub struct MemDevice {
    data: Mutex<Vec<u8>>,
    aligned: bool,
    /// Successful writes left before writes start failing
    writes_until_failure: AtomicUsize,
    /// Successful reads left before reads start failing
    reads_until_failure: AtomicUsize,
    write_calls: AtomicU64,
    read_calls: AtomicU64,
}

impl MemDevice {
    /// Create a zero-filled device of `len` bytes
    pub fn new(len: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; len]),
            aligned: false,
            writes_until_failure: AtomicUsize::new(usize::MAX),
            reads_until_failure: AtomicUsize::new(usize::MAX),
            write_calls: AtomicU64::new(0),
            read_calls: AtomicU64::new(0),
        }
    }

    /// Report that transfers need aligned buffers, like a direct-I/O device
    pub fn with_aligned_buffers(mut self) -> Self {
        self.aligned = true;
        self
    }

    /// Let `n` more writes succeed, then fail every write
    pub fn fail_writes_after(&self, n: usize) {
        self.writes_until_failure.store(n, Ordering::SeqCst);
    }

    /// Let `n` more reads succeed, then fail every read
    pub fn fail_reads_after(&self, n: usize) {
        self.reads_until_failure.store(n, Ordering::SeqCst);
    }

    /// Number of `write_at` calls so far
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Number of `read_at` calls so far
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Copy of `len` raw bytes at `offset`
    pub fn raw(&self, offset: usize, len: usize) -> Vec<u8> {
        self.data.lock()[offset..offset + len].to_vec()
    }

    /// Overwrite raw bytes at `offset`, bypassing the engine
    pub fn fill(&self, offset: usize, bytes: &[u8]) {
        self.data.lock()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn take_budget(budget: &AtomicUsize) -> bool {
        budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl BlockDevice for MemDevice {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if !Self::take_budget(&self.reads_until_failure) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }

        let data = self.data.lock();
        let start = offset as usize;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if !Self::take_budget(&self.writes_until_failure) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }

        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of {} bytes at {} past device end {}", buf.len(), start, data.len()),
            ));
        }
        data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn requires_aligned_buffers(&self) -> bool {
        self.aligned
    }
}
