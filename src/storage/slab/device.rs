//! Backing device handle
//!
//! The engine only needs positioned reads and writes. [`FileDevice`] opens a
//! block device (or a regular file) read-write with `O_SYNC`, optionally
//! `O_DIRECT`, and issues `pread`/`pwrite` against one shared descriptor.
//!
//! Concurrent positioned I/O on a single descriptor is assumed to be safe,
//! which holds for `pread`/`pwrite` on Linux.

use super::aligned::{DIRECT_IO_ALIGNMENT, SECTOR_SIZE};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Raw positioned I/O against a block-addressed device
pub trait BlockDevice: Send + Sync {
    /// Read into `buf` starting at byte `offset`
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write `buf` starting at byte `offset`
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;

    /// Push buffered writes to stable storage
    fn flush(&self) -> io::Result<()>;

    /// Whether transfers must use aligned memory (direct I/O)
    fn requires_aligned_buffers(&self) -> bool {
        false
    }

    /// Fill `buf` from `offset`; bytes past the end of the device read as zero
    fn read_block(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => {
                    buf[filled..].fill(0);
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Write all of `buf` at `offset`
    fn write_block(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            match self.write_at(&buf[written..], offset + written as u64) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "device accepted no bytes",
                    ))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// How the backing path is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOptions {
    /// Open with `O_SYNC`
    pub sync: bool,
    /// Open with `O_DIRECT` (Linux only) and use aligned buffers
    pub direct: bool,
    /// Create the path if missing and grow regular files to `create_len`
    pub create: bool,
    /// Length a created regular file is extended to
    pub create_len: u64,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            sync: true,
            direct: true,
            create: false,
            create_len: 0,
        }
    }
}

impl DeviceOptions {
    /// Buffered, file-friendly options (no `O_DIRECT`, created on demand)
    pub fn buffered_file(len: u64) -> Self {
        Self {
            sync: false,
            direct: false,
            create: true,
            create_len: len,
        }
    }

    fn open_flags(&self) -> i32 {
        let mut flags = 0;
        if self.sync {
            flags |= libc::O_SYNC;
        }
        if self.direct {
            flags |= direct_flag();
        }
        flags
    }
}

#[cfg(target_os = "linux")]
fn direct_flag() -> i32 {
    libc::O_DIRECT
}

#[cfg(not(target_os = "linux"))]
fn direct_flag() -> i32 {
    0
}

/// Device handle backed by a file descriptor
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    file: File,
    direct: bool,
}

impl FileDevice {
    /// Open `path` read-write with the given options
    pub fn open<P: AsRef<Path>>(path: P, options: &DeviceOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(options.create)
            .custom_flags(options.open_flags())
            .open(&path)
            .map_err(|source| {
                error!(path = %path.display(), error = %source, "Unable to open device");
                Error::DeviceOpen {
                    path: path.clone(),
                    source,
                }
            })?;

        if options.create {
            let metadata = file.metadata().map_err(|source| Error::DeviceOpen {
                path: path.clone(),
                source,
            })?;
            if metadata.is_file() && metadata.len() < options.create_len {
                file.set_len(options.create_len)
                    .map_err(|source| Error::DeviceOpen {
                        path: path.clone(),
                        source,
                    })?;
                debug!(path = %path.display(), len = options.create_len, "Extended backing file");
            }
        }

        info!(
            path = %path.display(),
            sync = options.sync,
            direct = options.direct,
            "Opened device"
        );

        Ok(Self {
            path,
            file,
            direct: options.direct,
        })
    }

    /// Path this device was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the descriptor, surfacing errors from `close(2)`
    pub fn close(self) -> Result<()> {
        let path = self.path;
        let fd = self.file.into_raw_fd();
        // SAFETY: `fd` was just released from an owned `File`, so nothing
        // else refers to it and it is closed exactly once.
        let ret = unsafe { libc::close(fd) };
        if ret < 0 {
            let source = io::Error::last_os_error();
            error!(path = %path.display(), error = %source, "Close failed");
            return Err(Error::DeviceClose { path, source });
        }
        info!(path = %path.display(), "Closed device");
        Ok(())
    }
}

impl BlockDevice for FileDevice {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        FileExt::read_at(&self.file, buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        FileExt::write_at(&self.file, buf, offset)
    }

    fn flush(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn requires_aligned_buffers(&self) -> bool {
        self.direct && cfg!(target_os = "linux")
    }
}

/// Check that `block_size` can be used with the given options
pub fn validate_block_size(block_size: u64, options: &DeviceOptions) -> Result<()> {
    if block_size == 0 {
        return Err(Error::InvalidConfig("block_size must be non-zero".to_string()));
    }
    if usize::try_from(block_size).is_err() {
        return Err(Error::InvalidConfig(format!(
            "block_size {} does not fit in memory",
            block_size
        )));
    }
    if options.direct && block_size % SECTOR_SIZE as u64 != 0 {
        return Err(Error::InvalidConfig(format!(
            "block_size {} must be a multiple of {} for direct I/O (buffers aligned to {})",
            block_size, SECTOR_SIZE, DIRECT_IO_ALIGNMENT
        )));
    }
    Ok(())
}
