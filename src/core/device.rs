//! Block device access
//!
//! The blobstore reads and writes whole pages at positional offsets. A
//! [`BlockDevice`] supplies that plus the device geometry (total size and
//! logical block size). [`DeviceFile`] wraps a regular file or a Linux block
//! device; [`MemoryDevice`] keeps everything in memory and can inject write
//! failures.

use crate::error::{BlobstoreError, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, FileTypeExt};
use std::path::{Path, PathBuf};

/// Default logical block size reported for regular files
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

/// Positional I/O and geometry of a device holding a blobstore
pub trait BlockDevice {
    /// Logical block size in bytes
    fn logical_block_size(&self) -> Result<u64>;

    /// Total size in bytes
    fn size(&self) -> Result<u64>;

    /// Fill `buf` from `offset`; a short read is an error
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` at `offset`; a short write is an error
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Make previous writes durable
    fn flush(&mut self) -> Result<()>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn logical_block_size(&self) -> Result<u64> {
        (**self).logical_block_size()
    }

    fn size(&self) -> Result<u64> {
        (**self).size()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        (**self).write_at(offset, buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Read page `index` (one transfer of `1 << io_shift` bytes)
pub fn read_page<D: BlockDevice + ?Sized>(
    device: &mut D,
    io_shift: u32,
    index: u32,
) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; 1usize << io_shift];
    device.read_at((index as u64) << io_shift, &mut buffer)?;
    Ok(buffer)
}

/// Write page `index`; `data` must be exactly one page
pub fn write_page<D: BlockDevice + ?Sized>(
    device: &mut D,
    io_shift: u32,
    index: u32,
    data: &[u8],
) -> Result<()> {
    let page_size = 1usize << io_shift;
    if data.len() != page_size {
        return Err(BlobstoreError::InvalidArgument(format!(
            "Page data must be exactly {} bytes, got {}",
            page_size,
            data.len()
        )));
    }
    device.write_at((index as u64) << io_shift, data)
}

/// File- or block-device-backed storage
pub struct DeviceFile {
    file: File,
    path: PathBuf,
    block_size: u64,
}

impl DeviceFile {
    /// Open an existing device or image file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(DeviceFile {
            file,
            path: path.as_ref().to_path_buf(),
            block_size: DEFAULT_BLOCK_SIZE,
        })
    }

    /// Create (or truncate) an image file of `size` bytes
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size)?;

        Ok(DeviceFile {
            file,
            path: path.as_ref().to_path_buf(),
            block_size: DEFAULT_BLOCK_SIZE,
        })
    }

    /// Logical block size to report when backed by a regular file
    ///
    /// Block devices always report what the kernel says.
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_block_device(&self) -> Result<bool> {
        Ok(self.file.metadata()?.file_type().is_block_device())
    }
}

impl BlockDevice for DeviceFile {
    fn logical_block_size(&self) -> Result<u64> {
        if self.is_block_device()? {
            ioctl::block_size(&self.file)
        } else {
            Ok(self.block_size)
        }
    }

    fn size(&self) -> Result<u64> {
        if self.is_block_device()? {
            ioctl::device_size(&self.file)
        } else {
            Ok(self.file.metadata()?.len())
        }
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod ioctl {
    use crate::error::Result;
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    const fn ior(nr: libc::c_ulong, size: usize) -> libc::c_ulong {
        (2 << 30) | ((size as libc::c_ulong) << 16) | (0x12 << 8) | nr
    }

    // <linux/fs.h>: both are declared with a size_t argument
    const BLKBSZGET: libc::c_ulong = ior(112, std::mem::size_of::<usize>());
    const BLKGETSIZE64: libc::c_ulong = ior(114, std::mem::size_of::<usize>());

    pub fn block_size(file: &File) -> Result<u64> {
        let mut value: libc::c_int = 0;
        // SAFETY: BLKBSZGET writes a single int through the pointer
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), BLKBSZGET as _, &mut value as *mut libc::c_int) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(value as u64)
    }

    pub fn device_size(file: &File) -> Result<u64> {
        let mut value: u64 = 0;
        // SAFETY: BLKGETSIZE64 writes a single u64 through the pointer
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut value as *mut u64) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(value)
    }
}

#[cfg(not(target_os = "linux"))]
mod ioctl {
    use crate::error::Result;
    use std::fs::File;
    use std::io;

    pub fn block_size(_file: &File) -> Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "block device geometry needs Linux").into())
    }

    pub fn device_size(_file: &File) -> Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "block device geometry needs Linux").into())
    }
}

/// In-memory device
///
/// Writes and flushes can each be made to fail after a budget is spent, to
/// exercise rollback paths.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    data: Vec<u8>,
    block_size: u64,
    write_budget: Option<usize>,
    flush_budget: Option<usize>,
    writes: usize,
    flushes: usize,
}

impl MemoryDevice {
    pub fn new(size: usize, block_size: u64) -> Self {
        MemoryDevice {
            data: vec![0u8; size],
            block_size,
            write_budget: None,
            flush_budget: None,
            writes: 0,
            flushes: 0,
        }
    }

    /// Let `n` more writes succeed, then fail every write
    pub fn fail_writes_after(&mut self, n: usize) {
        self.write_budget = Some(n);
    }

    /// Let `n` more flushes succeed, then fail every flush
    pub fn fail_flushes_after(&mut self, n: usize) {
        self.flush_budget = Some(n);
    }

    /// Stop injecting write and flush failures
    pub fn clear_failures(&mut self) {
        self.write_budget = None;
        self.flush_budget = None;
    }

    /// Successful writes so far
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Successful flushes so far
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn range(&self, offset: u64, len: usize) -> io::Result<std::ops::Range<usize>> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("transfer of {} bytes at {} past end of device", len, offset),
                )
            })?;
        Ok(start..end)
    }
}

impl BlockDevice for MemoryDevice {
    fn logical_block_size(&self) -> Result<u64> {
        Ok(self.block_size)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if let Some(budget) = self.write_budget.as_mut() {
            if *budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "injected write failure").into());
            }
            *budget -= 1;
        }

        let range = self.range(offset, buf.len())?;
        self.data[range].copy_from_slice(buf);
        self.writes += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(budget) = self.flush_budget.as_mut() {
            if *budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "injected flush failure").into());
            }
            *budget -= 1;
        }

        self.flushes += 1;
        Ok(())
    }
}
