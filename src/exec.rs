//! This module provides [`ExecRegion`], the executable mapping that backs
//! the translator's block ring.
//!
//! The region is mapped readable, writable and executable for the lifetime
//! of the translator: blocks are rewritten in place as the ring wraps, and
//! the x86-64 hosts the emitter targets keep the instruction cache coherent
//! with data writes across the serializing returns between translator and
//! emitted code. On other architectures [`ExecRegion::flush_icache`] must be
//! called after finalizing a block and before executing it.

use crate::error::Error;
use mmap_rs::{MmapMut, MmapOptions, UnsafeMmapFlags};

/// A fixed-size RWX mapping holding the code bytes of every block in the
/// ring, addressed as `region[handle * block_size ..]`.
pub struct ExecRegion {
    inner: MmapMut,
    block_size: usize,
}

impl ExecRegion {
    /// Maps `blocks * block_size` bytes of zeroed executable memory.
    pub fn new(blocks: usize, block_size: usize) -> Result<Self, Error> {
        let len = blocks
            .checked_mul(block_size)
            .ok_or(Error::ExecAllocFailed)?;

        // RWX is deliberate here; see the module docs. mmap-rs gates it
        // behind the JIT flag.
        let inner = unsafe {
            MmapOptions::new(len)?
                .with_unsafe_flags(UnsafeMmapFlags::JIT)
                .map_exec_mut()?
        };

        Ok(ExecRegion {
            inner,
            block_size,
        })
    }

    /// Yields the code bytes of one block.
    #[inline]
    pub fn block(&self, index: usize) -> &[u8] {
        let start = index * self.block_size;
        &self.inner[start..start + self.block_size]
    }

    /// Yields the code bytes of one block for writing.
    #[inline]
    pub fn block_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.block_size;
        &mut self.inner[start..start + self.block_size]
    }

    /// The host entry point of one block.
    #[inline]
    pub fn entry(&self, index: usize) -> *const u8 {
        self.block(index).as_ptr()
    }

    /// Flushes the instruction cache for the whole region. Required between
    /// write and execute on architectures without coherent instruction
    /// fetch; a no-op on x86-64.
    pub fn flush_icache(&self) -> Result<(), Error> {
        self.inner.flush_icache()?;
        Ok(())
    }
}
