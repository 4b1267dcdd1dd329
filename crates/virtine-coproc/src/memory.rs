//! Memory the coprocessor cleans virtines in.
//!
//! Virtine and snapshot addresses are plain `u64` offsets into a single linear memory. The
//! coprocessor only needs bulk reads and writes, so the trait stays small; [`DenseMemory`] is the
//! in-process backing used by simulations and tests, and [`SharedMemory`] lets the host side keep a
//! handle to the same bytes the device is writing.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

/// Bulk copies go through a bounce buffer of this size.
pub const COPY_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("memory access out of range: addr=0x{addr:x} len={len} size=0x{size:x}")]
    OutOfRange { addr: u64, len: u64, size: u64 },

    #[error("memory size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },
}

pub type MemoryResult<T> = Result<T, MemoryError>;

pub trait VirtineMemory: Send {
    fn size(&self) -> u64;

    fn read_into(&self, addr: u64, dst: &mut [u8]) -> MemoryResult<()>;

    fn write_from(&mut self, addr: u64, src: &[u8]) -> MemoryResult<()>;

    /// Copies `len` bytes from `src` to `dst`.
    ///
    /// Both ranges are validated before any byte is written, so a failed copy leaves memory
    /// untouched.
    fn copy_range(&mut self, src: u64, dst: u64, len: u64) -> MemoryResult<()> {
        if len == 0 {
            return Ok(());
        }
        let size = self.size();
        check_range(size, src, len)?;
        check_range(size, dst, len)?;

        let overlaps = src < dst + len && dst < src + len;
        if overlaps {
            let len_usize = usize::try_from(len).map_err(|_| MemoryError::SizeTooLarge { size: len })?;
            let mut buf = vec![0u8; len_usize];
            self.read_into(src, &mut buf)?;
            return self.write_from(dst, &buf);
        }

        let mut chunk = [0u8; COPY_CHUNK];
        let mut done = 0u64;
        while done < len {
            let n = (len - done).min(COPY_CHUNK as u64) as usize;
            self.read_into(src + done, &mut chunk[..n])?;
            self.write_from(dst + done, &chunk[..n])?;
            done += n as u64;
        }
        Ok(())
    }

    fn read_u64_le(&self, addr: u64) -> MemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_into(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u64_le(&mut self, addr: u64, value: u64) -> MemoryResult<()> {
        self.write_from(addr, &value.to_le_bytes())
    }
}

pub fn check_range(size: u64, addr: u64, len: u64) -> MemoryResult<()> {
    let end = addr
        .checked_add(len)
        .ok_or(MemoryError::OutOfRange { addr, len, size })?;
    if end > size {
        return Err(MemoryError::OutOfRange { addr, len, size });
    }
    Ok(())
}

/// Contiguous zero-initialized memory.
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> MemoryResult<Self> {
        let size_usize = usize::try_from(size).map_err(|_| MemoryError::SizeTooLarge { size })?;
        Ok(Self {
            data: vec![0u8; size_usize].into_boxed_slice(),
        })
    }

    fn span(&self, addr: u64, len: usize) -> MemoryResult<(usize, usize)> {
        check_range(self.size(), addr, len as u64)?;
        // `check_range` bounds both ends by the slice length, which is a `usize`.
        let start = addr as usize;
        Ok((start, start + len))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl VirtineMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&self, addr: u64, dst: &mut [u8]) -> MemoryResult<()> {
        let (start, end) = self.span(addr, dst.len())?;
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_from(&mut self, addr: u64, src: &[u8]) -> MemoryResult<()> {
        let (start, end) = self.span(addr, src.len())?;
        self.data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn copy_range(&mut self, src: u64, dst: u64, len: u64) -> MemoryResult<()> {
        if len == 0 {
            return Ok(());
        }
        let n = usize::try_from(len).map_err(|_| MemoryError::SizeTooLarge { size: len })?;
        let (src_start, _) = self.span(src, n)?;
        let (dst_start, _) = self.span(dst, n)?;
        self.data.copy_within(src_start..src_start + n, dst_start);
        Ok(())
    }
}

/// Clone-able handle to one [`DenseMemory`].
///
/// Every clone sees the same bytes; each access takes the inner lock for its duration only.
#[derive(Clone)]
pub struct SharedMemory {
    inner: Arc<Mutex<DenseMemory>>,
}

impl SharedMemory {
    pub fn new(size: u64) -> MemoryResult<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(DenseMemory::new(size)?)),
        })
    }

    /// Runs `f` with exclusive access to the backing memory.
    pub fn with<R>(&self, f: impl FnOnce(&mut DenseMemory) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl VirtineMemory for SharedMemory {
    fn size(&self) -> u64 {
        self.with(|mem| mem.size())
    }

    fn read_into(&self, addr: u64, dst: &mut [u8]) -> MemoryResult<()> {
        self.with(|mem| mem.read_into(addr, dst))
    }

    fn write_from(&mut self, addr: u64, src: &[u8]) -> MemoryResult<()> {
        self.with(|mem| mem.write_from(addr, src))
    }

    fn copy_range(&mut self, src: u64, dst: u64, len: u64) -> MemoryResult<()> {
        self.with(|mem| mem.copy_range(src, dst, len))
    }
}
