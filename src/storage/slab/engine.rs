//! Alignment-aware block I/O
//!
//! Turns a byte range inside a slot into whole-block device transfers.
//!
//! # Block decomposition
//!
//! ```text
//! offset = 5000, len = 9000, B = 4096
//!
//! block_index = 5000 / 4096 = 1, intra = 5000 % 4096 = 904
//!
//!   block 1          block 2          block 3
//! [....#######]  [###########]  [####.......]
//!   904..4096      0..4096         0..1712
//!   partial (RMW)  full            partial (RMW)
//! ```
//!
//! Block `i` of slot `s` lives at `s*B + i*B`. Nothing stops a request from
//! running past the slot's own block into the next slot's region.

use super::aligned::{AlignedBlock, DIRECT_IO_ALIGNMENT};
use super::device::BlockDevice;
use super::slot::SlotId;
use crate::error::{Error, Result};
use crate::metrics;
use tracing::{debug, warn};

/// One block touched by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Block number relative to the slot start
    pub block_index: u64,
    /// First byte inside the block
    pub intra_offset: usize,
    /// Bytes of the block covered by the request
    pub len: usize,
    /// Position of those bytes in the caller's buffer
    pub buf_offset: usize,
}

impl BlockSpan {
    /// Whether the request covers the whole block
    pub fn is_full(&self, block_size: usize) -> bool {
        self.intra_offset == 0 && self.len == block_size
    }
}

/// Iterator over the blocks a `(offset, len)` request spans
#[derive(Debug, Clone)]
pub struct BlockSpans {
    block_size: usize,
    block_index: u64,
    intra_offset: usize,
    buf_offset: usize,
    remaining: usize,
}

impl BlockSpans {
    /// Spans of `len` bytes from `offset`
    ///
    /// Returns `None` when the last byte would lie past `u64::MAX`.
    pub fn new(block_size: usize, offset: u64, len: usize) -> Option<Self> {
        if len > 0 {
            offset.checked_add(len as u64 - 1)?;
        }
        let bs = block_size as u64;
        Some(Self {
            block_size,
            block_index: offset / bs,
            intra_offset: (offset % bs) as usize,
            buf_offset: 0,
            remaining: len,
        })
    }
}

impl Iterator for BlockSpans {
    type Item = BlockSpan;

    fn next(&mut self) -> Option<BlockSpan> {
        if self.remaining == 0 {
            return None;
        }

        let len = (self.block_size - self.intra_offset).min(self.remaining);
        let span = BlockSpan {
            block_index: self.block_index,
            intra_offset: self.intra_offset,
            len,
            buf_offset: self.buf_offset,
        };

        self.intra_offset = 0;
        self.buf_offset += len;
        self.remaining -= len;
        if self.remaining > 0 {
            // bounded by the last byte's block, checked in `new`
            self.block_index += 1;
        }
        Some(span)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.intra_offset + self.remaining).div_ceil(self.block_size);
        let n = if self.remaining == 0 { 0 } else { n };
        (n, Some(n))
    }
}

impl ExactSizeIterator for BlockSpans {}

/// Read/write engine for one device with a fixed block size
pub struct AlignedIo<D: BlockDevice> {
    device: D,
    block_size: usize,
}

impl<D: BlockDevice> AlignedIo<D> {
    /// Wrap `device`; `block_size` must be non-zero
    pub fn new(device: D, block_size: usize) -> Self {
        debug_assert!(block_size > 0);
        Self { device, block_size }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Give the device back, e.g. to close it
    pub fn into_device(self) -> D {
        self.device
    }

    /// Blocks touched by a request on `slot`
    pub fn spans(&self, slot: SlotId, offset: u64, len: usize) -> Result<BlockSpans> {
        BlockSpans::new(self.block_size, offset, len).ok_or_else(|| {
            warn!(slot = %slot, offset, len, "Request runs past the address space");
            Error::OffsetOverflow {
                slot: slot.index(),
                offset,
            }
        })
    }

    fn scratch(&self) -> AlignedBlock {
        let align = if self.device.requires_aligned_buffers() {
            DIRECT_IO_ALIGNMENT
        } else {
            1
        };
        AlignedBlock::new(self.block_size, align)
    }

    fn address(&self, slot: SlotId, block_index: u64) -> Result<u64> {
        slot.block_offset(self.block_size as u64, block_index)
    }

    /// Write `data` at byte `offset` of `slot`
    ///
    /// Partially covered blocks are read, patched and written back. A
    /// failure aborts immediately; blocks already written stay written.
    pub fn write(&self, slot: SlotId, data: &[u8], offset: u64) -> Result<()> {
        let aligned = self.device.requires_aligned_buffers();
        let mut scratch: Option<AlignedBlock> = None;

        for span in self.spans(slot, offset, data.len())? {
            let addr = self.address(slot, span.block_index)?;
            let src = &data[span.buf_offset..span.buf_offset + span.len];

            if span.is_full(self.block_size) && !aligned {
                self.device
                    .write_block(src, addr)
                    .map_err(|source| self.io_error("write", slot, addr, source))?;
                metrics::record_block_op("full");
                continue;
            }

            let block = scratch.get_or_insert_with(|| self.scratch()).as_mut_slice();
            let kind = if span.is_full(self.block_size) {
                "full"
            } else {
                self.device
                    .read_block(block, addr)
                    .map_err(|source| self.io_error("read", slot, addr, source))?;
                "rmw"
            };

            block[span.intra_offset..span.intra_offset + span.len].copy_from_slice(src);
            self.device
                .write_block(block, addr)
                .map_err(|source| self.io_error("write", slot, addr, source))?;
            metrics::record_block_op(kind);
        }

        metrics::record_bytes("write", data.len());
        debug!(slot = %slot, offset, len = data.len(), "Wrote range");
        Ok(())
    }

    /// Read `buf.len()` bytes at byte `offset` of `slot` into `buf`
    ///
    /// Returns the number of bytes read, which is always `buf.len()`.
    pub fn read(&self, slot: SlotId, buf: &mut [u8], offset: u64) -> Result<usize> {
        let aligned = self.device.requires_aligned_buffers();
        let mut scratch: Option<AlignedBlock> = None;

        for span in self.spans(slot, offset, buf.len())? {
            let addr = self.address(slot, span.block_index)?;
            let dst = &mut buf[span.buf_offset..span.buf_offset + span.len];

            if span.is_full(self.block_size) && !aligned {
                self.device
                    .read_block(dst, addr)
                    .map_err(|source| self.io_error("read", slot, addr, source))?;
                continue;
            }

            let block = scratch.get_or_insert_with(|| self.scratch()).as_mut_slice();
            self.device
                .read_block(block, addr)
                .map_err(|source| self.io_error("read", slot, addr, source))?;
            dst.copy_from_slice(&block[span.intra_offset..span.intra_offset + span.len]);
        }

        metrics::record_bytes("read", buf.len());
        debug!(slot = %slot, offset, len = buf.len(), "Read range");
        Ok(buf.len())
    }

    /// Flush the device
    pub fn flush(&self) -> Result<()> {
        self.device
            .flush()
            .map_err(|source| Error::Io {
                op: "flush",
                offset: 0,
                source,
            })
    }

    fn io_error(
        &self,
        op: &'static str,
        slot: SlotId,
        offset: u64,
        source: std::io::Error,
    ) -> Error {
        warn!(slot = %slot, offset, op, error = %source, "Device I/O failed");
        Error::Io { op, offset, source }
    }
}
